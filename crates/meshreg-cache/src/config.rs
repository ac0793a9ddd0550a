//! Cache configuration.

use serde::Deserialize;

/// Configuration for the caching core.
///
/// Deserializable from the control plane's config file; unknown keys are
/// ignored so older configs keep working.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Offset applied to the fetch watermark, in seconds. Negative by
    /// default to tolerate store clock skew and out-of-order commits.
    pub diff_time_secs: i64,
    /// Interval between refresh rounds, in seconds.
    pub update_interval_secs: u64,
    /// Instance cache options.
    pub instance: InstanceOptions,
    /// Revision worker pool options.
    pub revision: RevisionOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            diff_time_secs: -5,
            update_interval_secs: 1,
            instance: InstanceOptions::default(),
            revision: RevisionOptions::default(),
        }
    }
}

/// Options for the instance cache.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstanceOptions {
    /// Load only the control plane's own system services.
    pub disable_business: bool,
    /// Request metadata alongside each instance.
    pub need_meta: bool,
}

/// Options for the revision worker pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RevisionOptions {
    /// Number of worker tasks.
    pub workers: usize,
    /// Capacity of the revision-compute queue.
    pub queue_size: usize,
    /// Pause after each successful computation, in milliseconds; caps
    /// CPU when many services churn at once.
    pub inter_work_sleep_ms: u64,
}

impl Default for RevisionOptions {
    fn default() -> Self {
        Self {
            workers: 64,
            queue_size: 102_400,
            inter_work_sleep_ms: 2,
        }
    }
}
