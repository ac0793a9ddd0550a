//! # meshreg-store
//!
//! The durable-store contract the caching core mirrors from.
//!
//! The store is a polymorphic backend exposing time-keyed
//! "get-more-since" queries: each call returns every record whose
//! `modify_time` is at or after the given watermark, *including
//! tombstones* (`valid == false`), so the cache can remove entries. The
//! `first_run` flag forces a full snapshot instead.
//!
//! All watermarks are unix seconds in the **store's** clock domain
//! ([`Store::get_unix_second`]); the cache never trusts the local clock
//! for fetch windows, so replicas with skewed clocks stay correct.
//!
//! [`MemoryStore`] is an in-memory implementation used by tests and
//! demos.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use meshreg_core::{
    AuthStrategy, CacheError, CircuitBreakerRule, ConfigFileRelease, FaultDetectRule, Instance,
    Namespace, RateLimit, RoutingConfig, Service, User,
};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within its deadline.
    #[error("store operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// The backend answered with data the caller cannot use.
    #[error("store data error: {0}")]
    Data(String),
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::store(err.to_string(), err)
    }
}

/// Result type alias using [`StoreError`].
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The durable-store contract required by the caching core.
///
/// Every `get_more_*` query takes `since` (unix seconds, store clock)
/// and `first_run`; the first run returns a full snapshot of live
/// records, later runs return the delta at or after `since`, tombstones
/// included.
#[async_trait]
pub trait Store: Send + Sync {
    /// Current unix-second timestamp of the store's clock.
    async fn get_unix_second(&self) -> StoreResult<i64>;

    /// Incremental instance delta.
    ///
    /// `need_meta` requests metadata alongside each instance; a
    /// non-empty `system_service_ids` restricts the result to those
    /// services.
    async fn get_more_instances(
        &self,
        since: i64,
        first_run: bool,
        need_meta: bool,
        system_service_ids: &[String],
    ) -> StoreResult<Vec<Instance>>;

    /// Incremental service delta.
    async fn get_more_services(&self, since: i64, first_run: bool) -> StoreResult<Vec<Service>>;

    /// Incremental namespace delta.
    async fn get_more_namespaces(&self, since: i64, first_run: bool)
        -> StoreResult<Vec<Namespace>>;

    /// Incremental routing-config delta.
    async fn get_more_routing_configs(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<RoutingConfig>>;

    /// Incremental rate-limit delta.
    async fn get_more_rate_limits(&self, since: i64, first_run: bool)
        -> StoreResult<Vec<RateLimit>>;

    /// Incremental user delta.
    async fn get_more_users(&self, since: i64, first_run: bool) -> StoreResult<Vec<User>>;

    /// Incremental authorization-strategy delta.
    async fn get_more_strategies(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<AuthStrategy>>;

    /// Incremental config-file-release delta.
    async fn get_more_config_file_releases(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<ConfigFileRelease>>;

    /// Incremental fault-detect rule delta.
    async fn get_fault_detect_rules(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<FaultDetectRule>>;

    /// Incremental circuit-breaker rule delta.
    async fn get_circuit_breaker_rules(
        &self,
        since: i64,
        first_run: bool,
    ) -> StoreResult<Vec<CircuitBreakerRule>>;

    /// Ground-truth count of live instances, used for drift detection.
    async fn get_instances_count(&self) -> StoreResult<u64>;

    /// The control plane's own system services.
    async fn get_system_services(&self) -> StoreResult<Vec<Service>>;
}
