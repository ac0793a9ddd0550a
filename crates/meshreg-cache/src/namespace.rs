//! The namespace cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meshreg_core::Namespace;
use meshreg_store::Store;
use tracing::error;

use crate::base::{BaseCache, FetchOutcome, ResourceCache};

/// Resource name of the namespace cache.
pub const NAMESPACE_CACHE_NAME: &str = "namespace";

/// The namespace cache, a single by-name index.
pub struct NamespaceCache {
    base: BaseCache,
    names: DashMap<String, Arc<Namespace>>,
}

impl NamespaceCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            names: DashMap::new(),
        }
    }

    /// Look up a namespace by name.
    pub fn get_namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        if name.is_empty() {
            return None;
        }
        self.names.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Snapshot of all namespaces.
    pub fn namespace_list(&self) -> Vec<Arc<Namespace>> {
        self.names.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of cached namespaces.
    pub fn namespace_count(&self) -> usize {
        self.names.len()
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let namespaces = self
            .base
            .store()
            .get_more_namespaces(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "namespace cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_namespaces(namespaces))
    }

    fn set_namespaces(&self, batch: Vec<Namespace>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }
        let total = batch.len();
        let mut last_mtime = self.base.last_mtime(NAMESPACE_CACHE_NAME);

        for item in batch {
            last_mtime = last_mtime.max(item.modify_time);
            if !item.valid {
                self.names.remove(&item.name);
                continue;
            }
            self.names.insert(item.name.clone(), Arc::new(item));
        }

        (
            Some(HashMap::from([(NAMESPACE_CACHE_NAME.to_string(), last_mtime)])),
            total,
        )
    }
}

#[async_trait]
impl ResourceCache for NamespaceCache {
    fn name(&self) -> &'static str {
        NAMESPACE_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                self.base
                    .do_cache_update(NAMESPACE_CACHE_NAME, || self.real_update())
                    .await
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use meshreg_store::MemoryStore;

    use super::*;

    fn cache() -> NamespaceCache {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        NamespaceCache::new(store, -5)
    }

    fn namespace(name: &str, mtime: i64) -> Namespace {
        Namespace {
            name: name.to_string(),
            comment: String::new(),
            owner: "ops".to_string(),
            modify_time: mtime,
            valid: true,
        }
    }

    #[test]
    fn upsert_and_tombstone() {
        let cache = cache();
        cache.set_namespaces(vec![namespace("default", 10), namespace("prod", 11)]);
        assert_eq!(cache.namespace_count(), 2);
        assert!(cache.get_namespace("prod").is_some());

        let mut dead = namespace("prod", 20);
        dead.valid = false;
        cache.set_namespaces(vec![dead]);
        assert!(cache.get_namespace("prod").is_none());
        assert_eq!(cache.namespace_count(), 1);
    }
}
