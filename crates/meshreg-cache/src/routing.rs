//! The routing-config cache: one routing record per service id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meshreg_core::RoutingConfig;
use meshreg_store::Store;
use tracing::error;

use crate::base::{BaseCache, FetchOutcome, ResourceCache};

/// Resource name of the routing cache.
pub const ROUTING_CACHE_NAME: &str = "routingConfig";

/// The routing-config cache.
pub struct RoutingCache {
    base: BaseCache,
    configs: DashMap<String, Arc<RoutingConfig>>,
}

impl RoutingCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            configs: DashMap::new(),
        }
    }

    /// The routing config of a service, if any.
    pub fn get_routing_config(&self, service_id: &str) -> Option<Arc<RoutingConfig>> {
        if service_id.is_empty() {
            return None;
        }
        self.configs.get(service_id).map(|r| Arc::clone(r.value()))
    }

    /// Number of cached routing configs.
    pub fn routing_count(&self) -> usize {
        self.configs.len()
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let configs = self
            .base
            .store()
            .get_more_routing_configs(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "routing cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_routing_configs(configs))
    }

    fn set_routing_configs(&self, batch: Vec<RoutingConfig>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }
        let total = batch.len();
        let mut last_mtime = self.base.last_mtime(ROUTING_CACHE_NAME);

        for item in batch {
            last_mtime = last_mtime.max(item.modify_time);
            if !item.valid {
                self.configs.remove(&item.id);
                continue;
            }
            self.configs.insert(item.id.clone(), Arc::new(item));
        }

        (
            Some(HashMap::from([(ROUTING_CACHE_NAME.to_string(), last_mtime)])),
            total,
        )
    }
}

#[async_trait]
impl ResourceCache for RoutingCache {
    fn name(&self) -> &'static str {
        ROUTING_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                self.base
                    .do_cache_update(ROUTING_CACHE_NAME, || self.real_update())
                    .await
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.configs.clear();
    }
}
