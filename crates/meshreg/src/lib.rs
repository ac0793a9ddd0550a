//! # meshreg
//!
//! The caching and revision-aggregation core of a service-mesh control
//! plane.
//!
//! The control plane exposes naming, routing, rate-limit,
//! circuit-breaker, fault-detect, configuration, and authorization data
//! to many clients; every read path is served from in-memory indexes
//! mirrored incrementally from a durable store.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meshreg::prelude::*;
//!
//! let store = Arc::new(MemoryStore::new());
//! let manager = CacheManager::builder().store(store).build()?;
//! manager.start().await?;
//!
//! // Lock-free reads against the mirrored indexes.
//! let instances = manager.instance().get_instances_by_service_id("svc-1");
//! let rules = manager.fault_detect().rules_for("checkout", "default");
//!
//! manager.shutdown();
//! ```
//!
//! ## Architecture
//!
//! This library is organized into several crates:
//!
//! - `meshreg-core` - Entity records, revision hashing, errors
//! - `meshreg-store` - The durable-store contract (plus an in-memory
//!   implementation for tests)
//! - `meshreg-cache` - The cache manager, typed caches, revision worker
//!   pool, and rule fan-out engine
//!
//! This crate (`meshreg`) re-exports all public APIs for convenience.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

// Re-export all sub-crates
pub use meshreg_cache as cache;
pub use meshreg_core as core;
pub use meshreg_store as store;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use meshreg::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use meshreg_core::{
        AuthStrategy, CacheError, CircuitBreakerRule, ConfigFileRelease, FaultDetectRule,
        Instance, InstanceCount, InstanceLabels, Location, MatchArgument, MatchArgumentKind,
        Namespace, RateLimit, Result, RoutingConfig, Service, ServiceKey, User, MATCH_ALL,
    };

    // Store contract
    pub use meshreg_store::{MemoryStore, Store, StoreError, StoreResult};

    // Cache types
    pub use meshreg_cache::{
        CacheConfig, CacheListener, CacheManager, CacheManagerBuilder, EventKind, FanoutRule,
        InstanceCache, InstanceOptions, ResourceCache, RevisionOptions, ServiceRules,
    };
}

/// Version information for this crate.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Minimum supported Rust version.
    pub const MSRV: &str = "1.75";

    /// Get version info as a string.
    pub fn version_string() -> String {
        format!("meshreg {} (MSRV {})", VERSION, MSRV)
    }
}
