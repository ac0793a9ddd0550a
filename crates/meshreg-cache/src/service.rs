//! The service cache.
//!
//! Mirrors service records with by-id and by-(namespace, name) indexes.
//! Alias records (`reference != ""`) are kept in their own index: they
//! are addressable by name, but they are not services in their own
//! right: they carry no instances and no aggregate revision.
//!
//! Service changes also feed the revision queue: an upsert re-enqueues
//! the aggregate computation (the service's own revision participates in
//! the digest), a tombstone removes the entry from the revision map.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use meshreg_core::{wildcard, Service};
use meshreg_store::Store;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::base::{BaseCache, FetchOutcome, ResourceCache};
use crate::listener::{CacheListener, EventKind, ListenerManager};
use crate::revision::RevisionNotify;

/// Resource name of the service cache.
pub const SERVICE_CACHE_NAME: &str = "service";

type ServiceBucket = Arc<DashMap<String, Arc<Service>>>;

/// The service cache.
pub struct ServiceCache {
    base: BaseCache,
    /// Concrete services by id.
    ids: DashMap<String, Arc<Service>>,
    /// Alias records by id.
    aliases: DashMap<String, Arc<Service>>,
    /// namespace -> name -> record (concrete services and aliases).
    names: DashMap<String, ServiceBucket>,
    revision_tx: mpsc::Sender<RevisionNotify>,
    listeners: ListenerManager<Service>,
}

impl ServiceCache {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        diff_time_secs: i64,
        revision_tx: mpsc::Sender<RevisionNotify>,
    ) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            ids: DashMap::new(),
            aliases: DashMap::new(),
            names: DashMap::new(),
            revision_tx,
            listeners: ListenerManager::new(),
        }
    }

    /// Register a listener for service events.
    pub fn add_listener(&self, listener: Arc<dyn CacheListener<Service>>) {
        self.listeners.add(listener);
    }

    /// Highest service modify time mirrored so far.
    pub fn last_mtime(&self) -> i64 {
        self.base.last_mtime(SERVICE_CACHE_NAME)
    }

    /// Look up a concrete service by id. Misses for aliases.
    pub fn get_service_by_id(&self, service_id: &str) -> Option<Arc<Service>> {
        if service_id.is_empty() {
            return None;
        }
        self.ids.get(service_id).map(|r| Arc::clone(r.value()))
    }

    /// The id an alias record points at, if `service_id` is an alias.
    pub fn get_alias_target(&self, service_id: &str) -> Option<String> {
        self.aliases
            .get(service_id)
            .map(|r| r.value().reference.clone())
    }

    /// Look up a record by namespace and name; aliases included.
    pub fn get_service_by_name(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        let bucket = self.names.get(namespace).map(|r| Arc::clone(r.value()))?;
        bucket.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Visit every alias record; return `false` to stop.
    pub fn iterate_aliases<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<Service>) -> bool,
    {
        for entry in self.aliases.iter() {
            if !f(entry.key(), entry.value()) {
                break;
            }
        }
    }

    /// Number of concrete services.
    pub fn service_count(&self) -> usize {
        self.ids.len()
    }

    /// Visit every concrete service; return `false` to stop.
    pub fn iterate_services<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<Service>) -> bool,
    {
        for entry in self.ids.iter() {
            if !f(entry.key(), entry.value()) {
                break;
            }
        }
    }

    /// Concrete services whose namespace and name match the given
    /// wildcard patterns (`pay*`, `*ment`, exact names).
    pub fn services_matching(&self, namespace_pattern: &str, name_pattern: &str) -> Vec<Arc<Service>> {
        let mut out = Vec::new();
        self.iterate_services(|_, service| {
            if wildcard::is_wild_match(&service.namespace, namespace_pattern)
                && wildcard::is_wild_match(&service.name, name_pattern)
            {
                out.push(Arc::clone(service));
            }
            true
        });
        out
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let services = self
            .base
            .store()
            .get_more_services(self.base.last_fetch_time(), self.base.is_first_update())
            .await
            .map_err(|err| {
                error!(error = %err, "service cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;
        Ok(self.set_services(services).await)
    }

    pub(crate) async fn set_services(&self, batch: Vec<Service>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }

        let total = batch.len();
        let mut last_mtime = self.last_mtime();

        for item in batch {
            last_mtime = last_mtime.max(item.modify_time);
            let item = Arc::new(item);

            if !item.valid {
                let existed_concrete = self.ids.remove(&item.id);
                let existed_alias = self.aliases.remove(&item.id);
                if let Some(bucket) = self
                    .names
                    .get(&item.namespace)
                    .map(|r| Arc::clone(r.value()))
                {
                    bucket.remove(&item.name);
                }
                if let Some((_, previous)) = existed_concrete {
                    self.listeners.emit(EventKind::Deleted, &previous);
                    self.notify_revision(&item.id, false).await;
                } else if existed_alias.is_some() {
                    self.listeners.emit(EventKind::Deleted, &item);
                }
                continue;
            }

            let previous = if item.is_alias() {
                // A record can change shape between refreshes; keep the
                // two id indexes disjoint.
                self.ids.remove(&item.id);
                self.aliases.insert(item.id.clone(), Arc::clone(&item))
            } else {
                self.aliases.remove(&item.id);
                self.ids.insert(item.id.clone(), Arc::clone(&item))
            };
            if previous.is_some() {
                self.listeners.emit(EventKind::Updated, &item);
            } else {
                self.listeners.emit(EventKind::Created, &item);
            }

            let bucket = {
                let entry = self
                    .names
                    .entry(item.namespace.clone())
                    .or_insert_with(|| Arc::new(DashMap::new()));
                Arc::clone(entry.value())
            };
            bucket.insert(item.name.clone(), Arc::clone(&item));

            if !item.is_alias() {
                self.notify_revision(&item.id, true).await;
            }
        }

        (
            Some(HashMap::from([(SERVICE_CACHE_NAME.to_string(), last_mtime)])),
            total,
        )
    }

    async fn notify_revision(&self, service_id: &str, valid: bool) {
        if self
            .revision_tx
            .send(RevisionNotify::new(service_id, valid))
            .await
            .is_err()
        {
            debug!(service_id = %service_id, "revision queue closed, dropping notify");
        }
    }
}

#[async_trait]
impl ResourceCache for ServiceCache {
    fn name(&self) -> &'static str {
        SERVICE_CACHE_NAME
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                let result = self
                    .base
                    .do_cache_update(SERVICE_CACHE_NAME, || self.real_update())
                    .await;
                self.base.log_last_mtime(SERVICE_CACHE_NAME, SERVICE_CACHE_NAME);
                result
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.ids.clear();
        self.aliases.clear();
        self.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use meshreg_store::MemoryStore;

    use super::*;

    fn cache() -> (ServiceCache, mpsc::Receiver<RevisionNotify>) {
        let (tx, rx) = mpsc::channel(1024);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (ServiceCache::new(store, -5, tx), rx)
    }

    fn service(id: &str, namespace: &str, name: &str, mtime: i64) -> Service {
        Service {
            id: id.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            revision: format!("rev-{id}"),
            reference: String::new(),
            metadata: HashMap::new(),
            modify_time: mtime,
            valid: true,
        }
    }

    #[tokio::test]
    async fn indexed_by_id_and_name() {
        let (cache, _rx) = cache();
        cache
            .set_services(vec![service("svc-1", "default", "checkout", 10)])
            .await;

        assert!(cache.get_service_by_id("svc-1").is_some());
        let by_name = cache.get_service_by_name("default", "checkout").unwrap();
        assert_eq!(by_name.id, "svc-1");
        assert_eq!(cache.service_count(), 1);
    }

    #[tokio::test]
    async fn alias_is_not_a_concrete_service() {
        let (cache, _rx) = cache();
        let mut alias = service("alias-1", "default", "checkout-alias", 10);
        alias.reference = "svc-1".to_string();
        cache.set_services(vec![alias]).await;

        assert!(cache.get_service_by_id("alias-1").is_none());
        assert_eq!(cache.get_alias_target("alias-1").unwrap(), "svc-1");
        // Still addressable by name.
        assert!(cache.get_service_by_name("default", "checkout-alias").is_some());
        assert_eq!(cache.service_count(), 0);
    }

    #[tokio::test]
    async fn tombstone_removes_and_notifies() {
        let (cache, mut rx) = cache();
        cache
            .set_services(vec![service("svc-1", "default", "checkout", 10)])
            .await;
        let upsert = rx.try_recv().unwrap();
        assert!(upsert.valid);

        let mut dead = service("svc-1", "default", "checkout", 20);
        dead.valid = false;
        cache.set_services(vec![dead]).await;

        assert!(cache.get_service_by_id("svc-1").is_none());
        assert!(cache.get_service_by_name("default", "checkout").is_none());
        let removal = rx.try_recv().unwrap();
        assert!(!removal.valid);
        assert_eq!(removal.service_id, "svc-1");
    }

    #[tokio::test]
    async fn alias_upsert_sends_no_revision_notify() {
        let (cache, mut rx) = cache();
        let mut alias = service("alias-1", "default", "checkout-alias", 10);
        alias.reference = "svc-1".to_string();
        cache.set_services(vec![alias]).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pattern_matching() {
        let (cache, _rx) = cache();
        cache
            .set_services(vec![
                service("svc-1", "default", "checkout", 10),
                service("svc-2", "default", "payment", 11),
                service("svc-3", "prod", "checkout", 12),
            ])
            .await;

        let matched = cache.services_matching("default", "check*");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "svc-1");

        let all_checkouts = cache.services_matching("*", "checkout");
        assert_eq!(all_checkouts.len(), 2);
    }
}
