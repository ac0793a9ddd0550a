//! In-memory [`Store`] implementation for tests and demos.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use meshreg_core::{
    AuthStrategy, CircuitBreakerRule, ConfigFileRelease, FaultDetectRule, Instance, Namespace,
    RateLimit, RoutingConfig, Service, User,
};

use crate::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    clock: i64,
    instances: HashMap<String, Instance>,
    services: HashMap<String, Service>,
    system_service_ids: HashSet<String>,
    namespaces: HashMap<String, Namespace>,
    routing_configs: HashMap<String, RoutingConfig>,
    rate_limits: HashMap<String, RateLimit>,
    users: HashMap<String, User>,
    strategies: HashMap<String, AuthStrategy>,
    releases: HashMap<String, ConfigFileRelease>,
    fault_detect_rules: HashMap<String, FaultDetectRule>,
    circuit_breaker_rules: HashMap<String, CircuitBreakerRule>,
    instance_count_override: Option<u64>,
    clock_failures: u32,
    instance_fetch_failures: u32,
}

/// An in-memory store.
///
/// Records are stored as-is, tombstones included, so incremental queries
/// replay exactly what a durable backend would: everything with
/// `modify_time >= since`. The clock is manual (tests advance it
/// explicitly), and failures can be injected for the error paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store with the clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store clock to an absolute unix-second value.
    pub fn set_clock(&self, secs: i64) {
        self.lock().clock = secs;
    }

    /// Advance the store clock.
    pub fn advance_clock(&self, secs: i64) {
        self.lock().clock += secs;
    }

    /// Insert or replace an instance record (tombstones included).
    pub fn put_instance(&self, instance: Instance) {
        self.lock().instances.insert(instance.id.clone(), instance);
    }

    /// Insert or replace a batch of instance records.
    pub fn put_instances(&self, instances: impl IntoIterator<Item = Instance>) {
        let mut inner = self.lock();
        for instance in instances {
            inner.instances.insert(instance.id.clone(), instance);
        }
    }

    /// Turn an existing instance into a tombstone at `mtime`.
    ///
    /// No-op when the id is unknown.
    pub fn tombstone_instance(&self, id: &str, mtime: i64) {
        let mut inner = self.lock();
        if let Some(instance) = inner.instances.get_mut(id) {
            instance.valid = false;
            instance.modify_time = mtime;
        }
    }

    /// Insert or replace a service record.
    pub fn put_service(&self, service: Service) {
        self.lock().services.insert(service.id.clone(), service);
    }

    /// Turn an existing service into a tombstone at `mtime`.
    pub fn tombstone_service(&self, id: &str, mtime: i64) {
        let mut inner = self.lock();
        if let Some(service) = inner.services.get_mut(id) {
            service.valid = false;
            service.modify_time = mtime;
        }
    }

    /// Mark a service id as one of the control plane's system services.
    pub fn mark_system_service(&self, id: impl Into<String>) {
        self.lock().system_service_ids.insert(id.into());
    }

    /// Insert or replace a namespace record.
    pub fn put_namespace(&self, namespace: Namespace) {
        self.lock()
            .namespaces
            .insert(namespace.name.clone(), namespace);
    }

    /// Insert or replace a routing-config record.
    pub fn put_routing_config(&self, config: RoutingConfig) {
        self.lock()
            .routing_configs
            .insert(config.id.clone(), config);
    }

    /// Insert or replace a rate-limit record.
    pub fn put_rate_limit(&self, rule: RateLimit) {
        self.lock().rate_limits.insert(rule.id.clone(), rule);
    }

    /// Insert or replace a user record.
    pub fn put_user(&self, user: User) {
        self.lock().users.insert(user.id.clone(), user);
    }

    /// Insert or replace an authorization-strategy record.
    pub fn put_strategy(&self, strategy: AuthStrategy) {
        self.lock().strategies.insert(strategy.id.clone(), strategy);
    }

    /// Insert or replace a config-file release.
    pub fn put_config_file_release(&self, release: ConfigFileRelease) {
        self.lock().releases.insert(release.id.clone(), release);
    }

    /// Insert or replace a fault-detect rule.
    pub fn put_fault_detect_rule(&self, rule: FaultDetectRule) {
        self.lock()
            .fault_detect_rules
            .insert(rule.id.clone(), rule);
    }

    /// Insert or replace a circuit-breaker rule.
    pub fn put_circuit_breaker_rule(&self, rule: CircuitBreakerRule) {
        self.lock()
            .circuit_breaker_rules
            .insert(rule.id.clone(), rule);
    }

    /// Report a fixed instance count instead of the real one; used to
    /// simulate drift.
    pub fn override_instance_count(&self, count: Option<u64>) {
        self.lock().instance_count_override = count;
    }

    /// Fail the next `n` clock reads.
    pub fn fail_clock_reads(&self, n: u32) {
        self.lock().clock_failures = n;
    }

    /// Fail the next `n` instance fetches.
    pub fn fail_instance_fetches(&self, n: u32) {
        self.lock().instance_fetch_failures = n;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn delta<'a, T, F>(records: impl Iterator<Item = &'a T>, since: i64, first_run: bool, meta: F) -> Vec<T>
where
    T: Clone + 'a,
    F: Fn(&T) -> (i64, bool),
{
    records
        .filter(|record| {
            let (mtime, valid) = meta(record);
            if first_run {
                valid
            } else {
                mtime >= since
            }
        })
        .cloned()
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_unix_second(&self) -> StoreResult<i64> {
        let mut inner = self.lock();
        if inner.clock_failures > 0 {
            inner.clock_failures -= 1;
            return Err(StoreError::Unavailable("clock read failed".to_string()));
        }
        Ok(inner.clock)
    }

    async fn get_more_instances(
        &self,
        since: i64,
        first_run: bool,
        need_meta: bool,
        system_service_ids: &[String],
    ) -> StoreResult<Vec<Instance>> {
        let mut inner = self.lock();
        if inner.instance_fetch_failures > 0 {
            inner.instance_fetch_failures -= 1;
            return Err(StoreError::Unavailable("instance fetch failed".to_string()));
        }
        let mut out = delta(inner.instances.values(), since, first_run, |ins: &Instance| {
            (ins.modify_time, ins.valid)
        });
        if !system_service_ids.is_empty() {
            out.retain(|ins| system_service_ids.contains(&ins.service_id));
        }
        if !need_meta {
            for ins in &mut out {
                ins.metadata.clear();
            }
        }
        Ok(out)
    }

    async fn get_more_services(&self, since: i64, first_run: bool) -> StoreResult<Vec<Service>> {
        let inner = self.lock();
        Ok(delta(inner.services.values(), since, first_run, |s: &Service| {
            (s.modify_time, s.valid)
        }))
    }

    async fn get_more_namespaces(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<Namespace>> {
        let inner = self.lock();
        Ok(delta(inner.namespaces.values(), since, first_run, |n: &Namespace| {
            (n.modify_time, n.valid)
        }))
    }

    async fn get_more_routing_configs(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<RoutingConfig>> {
        let inner = self.lock();
        Ok(delta(
            inner.routing_configs.values(),
            since,
            first_run,
            |r: &RoutingConfig| (r.modify_time, r.valid),
        ))
    }

    async fn get_more_rate_limits(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<RateLimit>> {
        let inner = self.lock();
        Ok(delta(inner.rate_limits.values(), since, first_run, |r: &RateLimit| {
            (r.modify_time, r.valid)
        }))
    }

    async fn get_more_users(&self, since: i64, first_run: bool) -> StoreResult<Vec<User>> {
        let inner = self.lock();
        Ok(delta(inner.users.values(), since, first_run, |u: &User| {
            (u.modify_time, u.valid)
        }))
    }

    async fn get_more_strategies(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<AuthStrategy>> {
        let inner = self.lock();
        Ok(delta(inner.strategies.values(), since, first_run, |s: &AuthStrategy| {
            (s.modify_time, s.valid)
        }))
    }

    async fn get_more_config_file_releases(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<ConfigFileRelease>> {
        let inner = self.lock();
        Ok(delta(inner.releases.values(), since, first_run, |r: &ConfigFileRelease| {
            (r.modify_time, r.valid)
        }))
    }

    async fn get_fault_detect_rules(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<FaultDetectRule>> {
        let inner = self.lock();
        Ok(delta(
            inner.fault_detect_rules.values(),
            since,
            first_run,
            |r: &FaultDetectRule| (r.modify_time, r.valid),
        ))
    }

    async fn get_circuit_breaker_rules(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<CircuitBreakerRule>> {
        let inner = self.lock();
        Ok(delta(
            inner.circuit_breaker_rules.values(),
            since,
            first_run,
            |r: &CircuitBreakerRule| (r.modify_time, r.valid),
        ))
    }

    async fn get_instances_count(&self) -> StoreResult<u64> {
        let inner = self.lock();
        if let Some(count) = inner.instance_count_override {
            return Ok(count);
        }
        Ok(inner.instances.values().filter(|ins| ins.valid).count() as u64)
    }

    async fn get_system_services(&self) -> StoreResult<Vec<Service>> {
        let inner = self.lock();
        Ok(inner
            .services
            .values()
            .filter(|s| s.valid && inner.system_service_ids.contains(&s.id))
            .cloned()
            .collect())
    }
}
