//! The fault-detect rule cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use meshreg_core::FaultDetectRule;
use meshreg_store::Store;
use tracing::error;

use crate::base::{BaseCache, FetchOutcome, ResourceCache};
use crate::rule::{RuleFanout, ServiceRules};

/// Resource name of the fault-detect cache.
pub const FAULT_DETECT_CACHE_NAME: &str = "faultDetectRule";

/// The fault-detect rule cache: the base refresh discipline over a
/// [`RuleFanout`].
pub struct FaultDetectCache {
    base: BaseCache,
    fanout: RuleFanout<FaultDetectRule>,
}

impl FaultDetectCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            fanout: RuleFanout::new(),
        }
    }

    /// The fault-detect rules governing `(service, namespace)`.
    ///
    /// Returns the first matching bucket in strict precedence order:
    /// service-specific, namespace-wildcard, global. The bucket may be
    /// empty.
    pub fn rules_for(&self, service: &str, namespace: &str) -> Arc<ServiceRules<FaultDetectRule>> {
        self.fanout.lookup(service, namespace)
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let rules = self
            .base
            .store()
            .get_fault_detect_rules(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "fault detect cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_rules(rules))
    }

    fn set_rules(&self, batch: Vec<FaultDetectRule>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }
        let total = batch.len();
        let mut last_mtime = self.base.last_mtime(FAULT_DETECT_CACHE_NAME);

        for rule in batch {
            last_mtime = last_mtime.max(rule.modify_time);
            if !rule.valid {
                self.fanout.delete_rule(&rule);
                continue;
            }
            self.fanout.store_rule(Arc::new(rule));
        }

        (
            Some(HashMap::from([(
                FAULT_DETECT_CACHE_NAME.to_string(),
                last_mtime,
            )])),
            total,
        )
    }
}

#[async_trait]
impl ResourceCache for FaultDetectCache {
    fn name(&self) -> &'static str {
        FAULT_DETECT_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                self.base
                    .do_cache_update(FAULT_DETECT_CACHE_NAME, || self.real_update())
                    .await
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.fanout.clear();
    }
}
