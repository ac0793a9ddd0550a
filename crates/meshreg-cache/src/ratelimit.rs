//! The rate-limit rule cache.
//!
//! Rules are indexed by id and by owning service. Older records carry
//! their match conditions in the legacy `labels` JSON field, newer ones
//! in the `arguments` list; both representations are normalized into
//! each other on ingest so readers never have to care which generation
//! wrote the record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meshreg_core::RateLimit;
use meshreg_store::Store;
use tracing::{error, warn};

use crate::base::{BaseCache, FetchOutcome, ResourceCache};

/// Resource name of the rate-limit cache.
pub const RATE_LIMIT_CACHE_NAME: &str = "rateLimit";

type RuleBucket = Arc<DashMap<String, Arc<RateLimit>>>;

/// The rate-limit rule cache.
pub struct RateLimitCache {
    base: BaseCache,
    ids: DashMap<String, Arc<RateLimit>>,
    by_service: DashMap<String, RuleBucket>,
}

impl RateLimitCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            ids: DashMap::new(),
            by_service: DashMap::new(),
        }
    }

    /// Look up a rule by id.
    pub fn get_rate_limit(&self, rule_id: &str) -> Option<Arc<RateLimit>> {
        if rule_id.is_empty() {
            return None;
        }
        self.ids.get(rule_id).map(|r| Arc::clone(r.value()))
    }

    /// All rules of a service, ordered by priority then id.
    pub fn get_rate_limits_by_service_id(&self, service_id: &str) -> Vec<Arc<RateLimit>> {
        if service_id.is_empty() {
            return Vec::new();
        }
        let Some(bucket) = self.by_service.get(service_id).map(|r| Arc::clone(r.value()))
        else {
            return Vec::new();
        };
        let mut rules: Vec<Arc<RateLimit>> =
            bucket.iter().map(|e| Arc::clone(e.value())).collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    /// Number of cached rules.
    pub fn rate_limit_count(&self) -> usize {
        self.ids.len()
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let rules = self
            .base
            .store()
            .get_more_rate_limits(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "rate limit cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_rate_limits(rules))
    }

    fn set_rate_limits(&self, batch: Vec<RateLimit>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }
        let total = batch.len();
        let mut last_mtime = self.base.last_mtime(RATE_LIMIT_CACHE_NAME);

        for mut item in batch {
            last_mtime = last_mtime.max(item.modify_time);

            if !item.valid {
                self.ids.remove(&item.id);
                if let Some(bucket) = self
                    .by_service
                    .get(&item.service_id)
                    .map(|r| Arc::clone(r.value()))
                {
                    bucket.remove(&item.id);
                }
                continue;
            }

            if let Err(err) = item.adapt_arguments_and_labels() {
                warn!(rule_id = %item.id, error = %err, "dropping rate limit rule with malformed labels");
                continue;
            }

            let item = Arc::new(item);
            self.ids.insert(item.id.clone(), Arc::clone(&item));
            let bucket = {
                let entry = self
                    .by_service
                    .entry(item.service_id.clone())
                    .or_insert_with(|| Arc::new(DashMap::new()));
                Arc::clone(entry.value())
            };
            bucket.insert(item.id.clone(), item);
        }

        (
            Some(HashMap::from([(RATE_LIMIT_CACHE_NAME.to_string(), last_mtime)])),
            total,
        )
    }
}

#[async_trait]
impl ResourceCache for RateLimitCache {
    fn name(&self) -> &'static str {
        RATE_LIMIT_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                self.base
                    .do_cache_update(RATE_LIMIT_CACHE_NAME, || self.real_update())
                    .await
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.ids.clear();
        self.by_service.clear();
    }
}
