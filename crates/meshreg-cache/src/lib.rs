//! # meshreg-cache
//!
//! The in-memory caching and revision-aggregation core of the meshreg
//! control plane.
//!
//! Every entity kind the control plane serves (services, instances,
//! rules, ...) is mirrored from the durable store into a typed cache by
//! an incremental refresh loop keyed on per-entity modify times, with a
//! periodic full-reconciliation fallback when counts diverge. Derived
//! aggregates, most importantly each service's *instance revision*,
//! are maintained off the hot path by a bounded worker pool, and
//! fault-detect / circuit-breaker rules are fanned out into per-service
//! buckets so a lookup is a single map probe.
//!
//! ## Key design decisions
//!
//! - **One writer, many readers**: each index is mutated only by its
//!   owning refresh task; readers do lock-free point reads on the
//!   concurrent maps. Guards are never held across `.await`.
//! - **Store clock, not local clock**: fetch windows are keyed off the
//!   store's own timestamp so replicas with skewed clocks stay correct.
//! - **Stale reads over failures**: a failing fetch leaves indexes
//!   untouched and is retried next tick; nothing at runtime is fatal.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meshreg_cache::CacheManager;
//! use meshreg_store::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let manager = CacheManager::builder().store(store).build()?;
//! manager.start().await?;
//!
//! let instances = manager.instance().get_instances_by_service_id("svc-1");
//! let revision = manager.service_instance_revision("svc-1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod base;
mod circuitbreaker;
mod config;
mod config_file;
mod faultdetect;
mod instance;
mod listener;
mod manager;
mod namespace;
mod ratelimit;
mod revision;
mod routing;
mod rule;
mod service;
mod user;

pub use base::ResourceCache;
pub use circuitbreaker::{CircuitBreakerCache, CIRCUIT_BREAKER_CACHE_NAME};
pub use config::{CacheConfig, InstanceOptions, RevisionOptions};
pub use config_file::{ConfigFileCache, CONFIG_FILE_CACHE_NAME};
pub use faultdetect::{FaultDetectCache, FAULT_DETECT_CACHE_NAME};
pub use instance::{InstanceCache, INSTANCE_CACHE_NAME};
pub use listener::{CacheListener, EventKind};
pub use manager::{CacheManager, CacheManagerBuilder};
pub use namespace::{NamespaceCache, NAMESPACE_CACHE_NAME};
pub use ratelimit::{RateLimitCache, RATE_LIMIT_CACHE_NAME};
pub use revision::{RevisionMap, RevisionNotify};
pub use routing::{RoutingCache, ROUTING_CACHE_NAME};
pub use rule::{FanoutRule, ServiceRules};
pub use service::{ServiceCache, SERVICE_CACHE_NAME};
pub use user::{StrategyCache, UserCache, STRATEGY_CACHE_NAME, USER_CACHE_NAME};
