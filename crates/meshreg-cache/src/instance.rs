//! The instance cache: the hottest read path in the control plane.
//!
//! Indexes are concurrent maps mutated by a single writer, the refresh
//! task, while readers do lock-free point lookups. `DashMap` guards are
//! cloned out and dropped immediately, and never held across `.await`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use meshreg_core::{Instance, InstanceCount, InstanceLabels};
use meshreg_store::Store;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::base::{unix_now, BaseCache, FetchOutcome, ResourceCache};
use crate::config::CacheConfig;
use crate::listener::{CacheListener, EventKind, ListenerManager};
use crate::revision::RevisionNotify;

/// Resource name of the instance cache.
pub const INSTANCE_CACHE_NAME: &str = "instance";

/// How often the in-memory total is reconciled against the store.
const CHECK_ALL_INTERVAL_SECS: i64 = 60;

/// Refresh rounds slower than this get logged at info.
const SLOW_REFRESH: Duration = Duration::from_secs(1);

type InstanceBucket = Arc<DashMap<String, Arc<Instance>>>;

/// The instance cache.
///
/// Carries four indexes: instance-id → instance, service-id → its
/// instances, service-id → instance counts, and service-id → the set of
/// ports seen on its live instances. The first two are the ground truth;
/// counts and ports are derived during refresh post-processing.
pub struct InstanceCache {
    base: BaseCache,
    ids: DashMap<String, Arc<Instance>>,
    services: DashMap<String, InstanceBucket>,
    counts: DashMap<String, InstanceCount>,
    ports: ServicePortsBucket,
    revision_tx: mpsc::Sender<RevisionNotify>,
    listeners: ListenerManager<Instance>,
    disable_business: AtomicBool,
    need_meta: AtomicBool,
    system_service_ids: RwLock<Vec<String>>,
    /// Live instance count, maintained incrementally and reconciled
    /// against the store by the periodic drift check.
    instance_count: AtomicI64,
    last_check_all: AtomicI64,
}

impl InstanceCache {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        diff_time_secs: i64,
        revision_tx: mpsc::Sender<RevisionNotify>,
    ) -> Self {
        Self {
            base: BaseCache::new(store, diff_time_secs),
            ids: DashMap::new(),
            services: DashMap::new(),
            counts: DashMap::new(),
            ports: ServicePortsBucket::default(),
            revision_tx,
            listeners: ListenerManager::new(),
            disable_business: AtomicBool::new(false),
            need_meta: AtomicBool::new(false),
            system_service_ids: RwLock::new(Vec::new()),
            instance_count: AtomicI64::new(0),
            last_check_all: AtomicI64::new(0),
        }
    }

    /// Register a listener for instance events.
    pub fn add_listener(&self, listener: Arc<dyn CacheListener<Instance>>) {
        self.listeners.add(listener);
    }

    /// Highest instance modify time mirrored so far.
    pub fn last_mtime(&self) -> i64 {
        self.base.last_mtime(INSTANCE_CACHE_NAME)
    }

    /// Look up an instance by id.
    pub fn get_instance(&self, instance_id: &str) -> Option<Arc<Instance>> {
        if instance_id.is_empty() {
            return None;
        }
        self.ids.get(instance_id).map(|r| Arc::clone(r.value()))
    }

    /// All instances of a service.
    pub fn get_instances_by_service_id(&self, service_id: &str) -> Vec<Arc<Instance>> {
        if service_id.is_empty() {
            return Vec::new();
        }
        let Some(bucket) = self.services.get(service_id).map(|r| Arc::clone(r.value())) else {
            return Vec::new();
        };
        bucket.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Instance statistics of a service; zero counts when unknown.
    pub fn get_instance_count_by_service_id(&self, service_id: &str) -> InstanceCount {
        if service_id.is_empty() {
            return InstanceCount::default();
        }
        self.counts
            .get(service_id)
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    /// Total number of cached instances.
    pub fn instance_count(&self) -> usize {
        self.ids.len()
    }

    /// Visit every instance; return `false` from the callback to stop.
    pub fn iterate_instances<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<Instance>) -> bool,
    {
        for entry in self.ids.iter() {
            if !f(entry.key(), entry.value()) {
                break;
            }
        }
    }

    /// Visit every instance of one service; return `false` to stop.
    pub fn iterate_service_instances<F>(&self, service_id: &str, mut f: F)
    where
        F: FnMut(&str, &Arc<Instance>) -> bool,
    {
        if service_id.is_empty() {
            return;
        }
        let Some(bucket) = self.services.get(service_id).map(|r| Arc::clone(r.value())) else {
            return;
        };
        for entry in bucket.iter() {
            if !f(entry.key(), entry.value()) {
                break;
            }
        }
    }

    /// Distinct ports seen across a service's live instances, sorted.
    pub fn get_service_ports(&self, service_id: &str) -> Vec<u32> {
        self.ports.list_ports(service_id)
    }

    /// Fold instance metadata into label → sorted distinct values.
    pub fn get_instance_labels(&self, service_id: &str) -> InstanceLabels {
        let mut folded: HashMap<String, BTreeSet<String>> = HashMap::new();
        self.iterate_service_instances(service_id, |_, instance| {
            for (key, value) in &instance.metadata {
                folded.entry(key.clone()).or_default().insert(value.clone());
            }
            true
        });

        InstanceLabels {
            labels: folded
                .into_iter()
                .map(|(key, values)| (key, values.into_iter().collect()))
                .collect(),
        }
    }

    async fn real_update(&self) -> meshreg_core::Result<FetchOutcome> {
        let started = Instant::now();
        let system_service_ids = self
            .system_service_ids
            .read()
            .expect("system service ids lock poisoned")
            .clone();
        let instances = self
            .base
            .store()
            .get_more_instances(
                self.base.last_fetch_time(),
                self.base.is_first_update(),
                self.need_meta.load(Ordering::Relaxed),
                &system_service_ids,
            )
            .await
            .map_err(|err| {
                error!(error = %err, "instance cache fetch failed");
                meshreg_core::CacheError::from(err)
            })?;

        let outcome = self.set_instances(instances).await;
        if started.elapsed() > SLOW_REFRESH {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                records = outcome.1,
                "slow instance refresh"
            );
        }
        Ok(outcome)
    }

    /// Apply one instance delta batch to the indexes.
    pub(crate) async fn set_instances(&self, batch: Vec<Instance>) -> FetchOutcome {
        if batch.is_empty() {
            return (None, 0);
        }

        let total = batch.len();
        let mut last_mtime = self.last_mtime();
        let mut affected: HashSet<String> = HashSet::new();
        let mut added = 0usize;
        let mut updated = 0usize;
        let mut deleted = 0usize;
        let mut live_count = self.instance_count.load(Ordering::Relaxed);

        for mut item in batch {
            last_mtime = last_mtime.max(item.modify_time);
            affected.insert(item.service_id.clone());

            if !item.valid {
                deleted += 1;
                let record = Arc::new(item);
                if let Some((_, previous)) = self.ids.remove(&record.id) {
                    self.listeners.emit(EventKind::Deleted, &previous);
                    live_count -= 1;
                }
                if let Some(bucket) = self
                    .services
                    .get(&record.service_id)
                    .map(|r| Arc::clone(r.value()))
                {
                    bucket.remove(&record.id);
                }
                continue;
            }

            item.fill_internal_labels();
            let item = Arc::new(item);
            let previous = self.ids.insert(item.id.clone(), Arc::clone(&item));
            if previous.is_some() {
                updated += 1;
                self.listeners.emit(EventKind::Updated, &item);
            } else {
                added += 1;
                live_count += 1;
                self.listeners.emit(EventKind::Created, &item);
            }

            let bucket = {
                let entry = self
                    .services
                    .entry(item.service_id.clone())
                    .or_insert_with(|| Arc::new(DashMap::new()));
                Arc::clone(entry.value())
            };
            bucket.insert(item.id.clone(), Arc::clone(&item));
            self.ports.append_port(&item.service_id, item.port);
        }

        let previous_count = self.instance_count.load(Ordering::Relaxed);
        if previous_count != live_count {
            info!(from = previous_count, to = live_count, "live instance count changed");
            self.instance_count.store(live_count, Ordering::Relaxed);
        }
        debug!(added, updated, deleted, "instance batch applied");

        self.post_process_updated_services(&affected).await;
        self.listeners.emit_reload(&affected);

        (
            Some(HashMap::from([(INSTANCE_CACHE_NAME.to_string(), last_mtime)])),
            total,
        )
    }

    /// For every service the batch touched: enqueue a revision-compute
    /// job and rebuild its instance counts from its bucket.
    async fn post_process_updated_services(&self, affected: &HashSet<String>) {
        for service_id in affected {
            if self
                .revision_tx
                .send(RevisionNotify::new(service_id.clone(), true))
                .await
                .is_err()
            {
                // Queue closed: shutdown in progress.
                debug!(service_id = %service_id, "revision queue closed, dropping notify");
            }

            let Some(bucket) = self.services.get(service_id).map(|r| Arc::clone(r.value()))
            else {
                self.counts.remove(service_id);
                continue;
            };

            let mut count = InstanceCount::default();
            for entry in bucket.iter() {
                let instance = entry.value();
                count.total += 1;
                if instance.is_healthy() {
                    count.healthy += 1;
                }
                if instance.isolate {
                    count.isolated += 1;
                }
            }
            if count.total == 0 {
                self.counts.remove(service_id);
                continue;
            }
            self.counts.insert(service_id.clone(), count);
        }
    }

    /// Periodic drift check: when the in-memory total diverges from the
    /// store's ground truth, reset the watermarks so the next tick
    /// re-mirrors the full set.
    async fn check_all(&self) {
        let now = unix_now();
        if now - self.last_check_all.load(Ordering::Relaxed) < CHECK_ALL_INTERVAL_SECS {
            return;
        }
        self.last_check_all.store(now, Ordering::Relaxed);

        let count = match self.base.store().get_instances_count().await {
            Ok(count) => count,
            Err(err) => {
                error!(error = %err, "failed to read instance count from store");
                return;
            }
        };
        let cached = self.instance_count.load(Ordering::Relaxed);
        if cached == count as i64 {
            return;
        }
        info!(
            store = count,
            cached = cached,
            "instance count mismatch, falling back to full reload"
        );
        self.base.reset_last_mtime(INSTANCE_CACHE_NAME);
        self.base.reset_last_fetch_time();
    }
}

#[async_trait]
impl ResourceCache for InstanceCache {
    fn name(&self) -> &'static str {
        INSTANCE_CACHE_NAME
    }

    async fn initialize(&self, config: &CacheConfig) -> meshreg_core::Result<()> {
        self.disable_business
            .store(config.instance.disable_business, Ordering::Relaxed);
        self.need_meta
            .store(config.instance.need_meta, Ordering::Relaxed);

        if config.instance.disable_business {
            let services = self.base.store().get_system_services().await.map_err(|err| {
                error!(error = %err, "failed to load system services");
                meshreg_core::CacheError::from(err)
            })?;
            let ids: Vec<String> = services
                .into_iter()
                .filter(|service| !service.is_alias())
                .map(|service| service.id)
                .collect();
            *self
                .system_service_ids
                .write()
                .expect("system service ids lock poisoned") = ids;
        }
        Ok(())
    }

    async fn update(&self) -> meshreg_core::Result<()> {
        self.base
            .refresh(|| async {
                let result = self
                    .base
                    .do_cache_update(INSTANCE_CACHE_NAME, || self.real_update())
                    .await;
                self.base.log_last_mtime(INSTANCE_CACHE_NAME, INSTANCE_CACHE_NAME);
                self.check_all().await;
                result
            })
            .await
    }

    fn clear(&self) {
        self.base.clear();
        self.ids.clear();
        self.services.clear();
        self.counts.clear();
        self.ports.reset();
        self.instance_count.store(0, Ordering::Relaxed);
    }
}

/// Ports seen per service. Appended monotonically; cleared only on full
/// reset.
#[derive(Default)]
struct ServicePortsBucket {
    ports: RwLock<HashMap<String, BTreeSet<u32>>>,
}

impl ServicePortsBucket {
    fn append_port(&self, service_id: &str, port: u32) {
        self.ports
            .write()
            .expect("service ports lock poisoned")
            .entry(service_id.to_string())
            .or_default()
            .insert(port);
    }

    fn list_ports(&self, service_id: &str) -> Vec<u32> {
        self.ports
            .read()
            .expect("service ports lock poisoned")
            .get(service_id)
            .map(|ports| ports.iter().copied().collect())
            .unwrap_or_default()
    }

    fn reset(&self) {
        self.ports
            .write()
            .expect("service ports lock poisoned")
            .clear();
    }
}
