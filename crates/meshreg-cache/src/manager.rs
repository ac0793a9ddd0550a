//! The cache manager: owns one of every typed cache, the refresh
//! scheduler, and the revision worker pool.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshreg_core::CacheError;
use meshreg_store::Store;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::base::ResourceCache;
use crate::circuitbreaker::CircuitBreakerCache;
use crate::config::CacheConfig;
use crate::config_file::ConfigFileCache;
use crate::faultdetect::FaultDetectCache;
use crate::instance::InstanceCache;
use crate::namespace::NamespaceCache;
use crate::ratelimit::RateLimitCache;
use crate::revision::{spawn_revision_workers, RevisionMap, RevisionNotify};
use crate::routing::RoutingCache;
use crate::service::ServiceCache;
use crate::user::{StrategyCache, UserCache};

/// Builder for [`CacheManager`].
#[derive(Default)]
pub struct CacheManagerBuilder {
    store: Option<Arc<dyn Store>>,
    config: CacheConfig,
}

impl CacheManagerBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            store: None,
            config: CacheConfig::default(),
        }
    }

    /// Set the durable store backing every cache.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the manager. Fails on a missing store, nonsense pool
    /// sizing, or two caches registered under one resource name.
    pub fn build(self) -> meshreg_core::Result<CacheManager> {
        let store = self
            .store
            .ok_or_else(|| CacheError::Configuration("store is required".to_string()))?;
        let config = self.config;

        if config.update_interval_secs == 0 {
            return Err(CacheError::Configuration(
                "updateIntervalSecs must be positive".to_string(),
            ));
        }
        if config.revision.workers == 0 || config.revision.queue_size == 0 {
            return Err(CacheError::Configuration(
                "revision pool needs at least one worker and a non-empty queue".to_string(),
            ));
        }

        let diff = config.diff_time_secs;
        let (revision_tx, revision_rx) = mpsc::channel(config.revision.queue_size);

        let instance = Arc::new(InstanceCache::new(
            Arc::clone(&store),
            diff,
            revision_tx.clone(),
        ));
        let service = Arc::new(ServiceCache::new(Arc::clone(&store), diff, revision_tx));
        let namespace = Arc::new(NamespaceCache::new(Arc::clone(&store), diff));
        let routing = Arc::new(RoutingCache::new(Arc::clone(&store), diff));
        let rate_limit = Arc::new(RateLimitCache::new(Arc::clone(&store), diff));
        let fault_detect = Arc::new(FaultDetectCache::new(Arc::clone(&store), diff));
        let circuit_breaker = Arc::new(CircuitBreakerCache::new(Arc::clone(&store), diff));
        let user = Arc::new(UserCache::new(Arc::clone(&store), diff));
        let strategy = Arc::new(StrategyCache::new(Arc::clone(&store), diff));
        let config_file = Arc::new(ConfigFileCache::new(Arc::clone(&store), diff));

        let caches: Vec<Arc<dyn ResourceCache>> = vec![
            Arc::clone(&instance) as Arc<dyn ResourceCache>,
            Arc::clone(&service) as Arc<dyn ResourceCache>,
            Arc::clone(&namespace) as Arc<dyn ResourceCache>,
            Arc::clone(&routing) as Arc<dyn ResourceCache>,
            Arc::clone(&rate_limit) as Arc<dyn ResourceCache>,
            Arc::clone(&fault_detect) as Arc<dyn ResourceCache>,
            Arc::clone(&circuit_breaker) as Arc<dyn ResourceCache>,
            Arc::clone(&user) as Arc<dyn ResourceCache>,
            Arc::clone(&strategy) as Arc<dyn ResourceCache>,
            Arc::clone(&config_file) as Arc<dyn ResourceCache>,
        ];

        let mut seen = HashSet::new();
        for cache in &caches {
            if !seen.insert(cache.name()) {
                return Err(CacheError::DuplicateResource {
                    name: cache.name().to_string(),
                });
            }
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(CacheManager {
            config,
            instance,
            service,
            namespace,
            routing,
            rate_limit,
            fault_detect,
            circuit_breaker,
            user,
            strategy,
            config_file,
            caches,
            revisions: Arc::new(RevisionMap::default()),
            revision_rx: Mutex::new(Some(revision_rx)),
            shutdown_tx,
        })
    }
}

/// The cache manager.
///
/// [`CacheManager::start`] initializes every cache, spins up the
/// revision worker pool, runs one synchronous refresh round, and then
/// ticks every `update_interval_secs`, fanning out one refresh task per
/// cache. Refresh errors are logged, never fatal; readers simply see
/// stale data until the next successful round.
pub struct CacheManager {
    config: CacheConfig,
    instance: Arc<InstanceCache>,
    service: Arc<ServiceCache>,
    namespace: Arc<NamespaceCache>,
    routing: Arc<RoutingCache>,
    rate_limit: Arc<RateLimitCache>,
    fault_detect: Arc<FaultDetectCache>,
    circuit_breaker: Arc<CircuitBreakerCache>,
    user: Arc<UserCache>,
    strategy: Arc<StrategyCache>,
    config_file: Arc<ConfigFileCache>,
    caches: Vec<Arc<dyn ResourceCache>>,
    revisions: Arc<RevisionMap>,
    revision_rx: Mutex<Option<mpsc::Receiver<RevisionNotify>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl CacheManager {
    /// Start building a manager.
    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    /// Initialize the caches, start the revision workers and the
    /// scheduler, and run the first refresh round synchronously.
    ///
    /// When this returns, every cache has been offered its first
    /// snapshot (individual fetch failures are logged and retried on
    /// the next tick).
    pub async fn start(&self) -> meshreg_core::Result<()> {
        for cache in &self.caches {
            cache.initialize(&self.config).await?;
        }

        let receiver = self
            .revision_rx
            .lock()
            .expect("revision receiver lock poisoned")
            .take()
            .ok_or_else(|| {
                CacheError::Configuration("cache manager already started".to_string())
            })?;
        spawn_revision_workers(
            &self.config.revision,
            receiver,
            Arc::clone(&self.service),
            Arc::clone(&self.instance),
            Arc::clone(&self.revisions),
            self.shutdown_tx.subscribe(),
        );

        info!("cache manager started, running first refresh");
        self.update().await;
        info!("first cache refresh done");

        let caches = self.caches.clone();
        let period = Duration::from_secs(self.config.update_interval_secs);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_update_round(&caches).await;
                    }
                    _ = shutdown.changed() => {
                        info!("cache scheduler stopped");
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    /// Run one refresh round across every cache, in parallel. Errors
    /// are logged per cache and do not stop the round.
    pub async fn update(&self) {
        run_update_round(&self.caches).await;
    }

    /// Stop the scheduler and the revision workers. In-flight refreshes
    /// finish on their own.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Drop all cached data, including the revision map. The next tick
    /// re-mirrors everything from the store.
    pub fn clear(&self) {
        self.revisions.clear();
        for cache in &self.caches {
            cache.clear();
        }
        info!("all caches cleared");
    }

    /// The computed aggregate revision of a service's instance set.
    ///
    /// `None` means not computed yet; callers fall back to the
    /// service's own revision.
    pub fn service_instance_revision(&self, service_id: &str) -> Option<String> {
        self.revisions.get(service_id)
    }

    /// Number of services with a computed aggregate revision.
    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }

    /// The instance cache.
    pub fn instance(&self) -> &InstanceCache {
        &self.instance
    }

    /// The service cache.
    pub fn service(&self) -> &ServiceCache {
        &self.service
    }

    /// The namespace cache.
    pub fn namespace(&self) -> &NamespaceCache {
        &self.namespace
    }

    /// The routing-config cache.
    pub fn routing(&self) -> &RoutingCache {
        &self.routing
    }

    /// The rate-limit cache.
    pub fn rate_limit(&self) -> &RateLimitCache {
        &self.rate_limit
    }

    /// The fault-detect rule cache.
    pub fn fault_detect(&self) -> &FaultDetectCache {
        &self.fault_detect
    }

    /// The circuit-breaker rule cache.
    pub fn circuit_breaker(&self) -> &CircuitBreakerCache {
        &self.circuit_breaker
    }

    /// The user cache.
    pub fn user(&self) -> &UserCache {
        &self.user
    }

    /// The authorization-strategy cache.
    pub fn strategy(&self) -> &StrategyCache {
        &self.strategy
    }

    /// The config-file release cache.
    pub fn config_file(&self) -> &ConfigFileCache {
        &self.config_file
    }
}

async fn run_update_round(caches: &[Arc<dyn ResourceCache>]) {
    let mut tasks = Vec::with_capacity(caches.len());
    for cache in caches {
        let cache = Arc::clone(cache);
        tasks.push(tokio::spawn(async move {
            if let Err(err) = cache.update().await {
                warn!(cache = cache.name(), error = %err, "cache refresh failed");
            }
        }));
    }
    for task in tasks {
        let _ = task.await;
    }
}
