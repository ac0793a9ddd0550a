//! The circuit-breaker rule cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use meshreg_core::CircuitBreakerRule;
use meshreg_store::Store;
use tracing::error;

use crate::base::{BaseCache, FetchOutcome, ResourceCache};
use crate::rule::{RuleFanout, ServiceRules};

/// Resource name of the circuit-breaker cache.
pub const CIRCUIT_BREAKER_CACHE_NAME: &str = "circuitBreakerRule";

/// The circuit-breaker rule cache; same fan-out model as the
/// fault-detect cache.
pub struct CircuitBreakerCache {
    base: BaseCache,
    fanout: RuleFanout<CircuitBreakerRule>,
}

impl CircuitBreakerCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            fanout: RuleFanout::new(),
        }
    }

    /// The circuit-breaker rules governing `(service, namespace)`, in
    /// strict precedence order. The bucket may be empty.
    pub fn rules_for(
        &self,
        service: &str,
        namespace: &str,
    ) -> Arc<ServiceRules<CircuitBreakerRule>> {
        self.fanout.lookup(service, namespace)
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let rules = self
            .base
            .store()
            .get_circuit_breaker_rules(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "circuit breaker cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_rules(rules))
    }

    fn set_rules(&self, batch: Vec<CircuitBreakerRule>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }
        let total = batch.len();
        let mut last_mtime = self.base.last_mtime(CIRCUIT_BREAKER_CACHE_NAME);

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
                CIRCUIT_BREAKER_CACHE_NAME.to_string(),
                last_mtime,
            )])),
            total,
        )
    }
}

#[async_trait]
impl ResourceCache for CircuitBreakerCache {
    fn name(&self) -> &'static str {
        CIRCUIT_BREAKER_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                self.base
                    .do_cache_update(CIRCUIT_BREAKER_CACHE_NAME, || self.real_update())
                    .await
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.fanout.clear();
    }
}
