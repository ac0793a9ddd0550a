//! # meshreg-core
//!
//! Core types for the meshreg control plane: the entity records mirrored
//! from the durable store, the error type, revision hashing, and small
//! shared utilities.
//!
//! This crate provides the foundational types used across all other
//! meshreg crates:
//!
//! - [`CacheError`] - Error type covering store, configuration, and
//!   record-shape failures
//! - Entity records ([`Service`], [`Instance`], rule records, ...) with
//!   their derived aggregates ([`InstanceCount`], [`InstanceLabels`])
//! - [`revision`] - SHA-1 revision digests over record sets
//! - [`wildcard`] - prefix/suffix `*` pattern matching
//!
//! ## Example
//!
//! ```rust
//! use meshreg_core::revision::compute_revision;
//!
//! let digest = compute_revision("svc-rev", vec!["b".to_string(), "a".to_string()]);
//! assert_eq!(digest.len(), 40); // hex sha-1
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config_file;
mod error;
mod instance;
mod rule;
mod service;

pub mod ids;
pub mod revision;
pub mod wildcard;

pub use auth::{AuthStrategy, User};
pub use config_file::{release_key, ConfigFileRelease};
pub use error::CacheError;
pub use instance::{Instance, InstanceCount, InstanceLabels, Location};
pub use rule::{
    CircuitBreakerRule, FaultDetectRule, MatchArgument, MatchArgumentKind, RateLimit,
    RoutingConfig, MATCH_ALL,
};
pub use service::{Namespace, Service, ServiceKey};

/// Result type alias using [`CacheError`].
pub type Result<T> = std::result::Result<T, CacheError>;
