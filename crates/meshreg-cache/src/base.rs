//! The refresh discipline shared by every typed cache.
//!
//! Each cache owns a [`BaseCache`] carrying the fetch watermarks:
//! `last_fetch_time` (the store's clock when the last round *started*),
//! a per-label `last_mtimes` map (the highest modify time observed so
//! far), and the `first_update` flag that forces a full snapshot on the
//! first round. All timestamps are unix seconds in the store's clock
//! domain, never the local clock, so replicas with skewed clocks stay
//! correct.
//!
//! Concurrent refresh triggers for the same cache coalesce through
//! [`SingleFlight`]: whoever holds the flight runs the round, everyone
//! else waits for it and returns.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use meshreg_store::Store;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

const MTIME_LOG_INTERVAL_SECS: i64 = 120;

/// The interface every typed cache implements; the manager drives caches
/// exclusively through it.
#[async_trait]
pub trait ResourceCache: Send + Sync {
    /// Resource name of this cache, unique across the manager.
    fn name(&self) -> &'static str;

    /// One-time setup before the first refresh.
    async fn initialize(&self, _config: &CacheConfig) -> meshreg_core::Result<()> {
        Ok(())
    }

    /// Run one refresh round. Concurrent calls coalesce.
    async fn update(&self) -> meshreg_core::Result<()>;

    /// Drop all cached data and reset the watermarks; the next round
    /// re-mirrors from scratch.
    fn clear(&self);
}

/// Result of one kind-specific fetch: the per-label max modify times
/// actually observed (`None` when the batch was empty) and the number of
/// records processed.
pub(crate) type FetchOutcome = (Option<HashMap<String, i64>>, usize);

struct RefreshState {
    last_fetch_time: i64,
    last_mtimes: HashMap<String, i64>,
    first_update: bool,
}

/// Shared refresh shell. Typed caches embed one and delegate the
/// watermark bookkeeping to it.
pub(crate) struct BaseCache {
    store: Arc<dyn Store>,
    diff_time_secs: i64,
    state: RwLock<RefreshState>,
    flight: SingleFlight,
    last_mtime_logged: AtomicI64,
}

impl BaseCache {
    pub(crate) fn new(store: Arc<dyn Store>, diff_time_secs: i64) -> Self {
        Self {
            store,
            diff_time_secs,
            state: RwLock::new(RefreshState {
                last_fetch_time: 1,
                last_mtimes: HashMap::new(),
                first_update: true,
            }),
            flight: SingleFlight::new(),
            last_mtime_logged: AtomicI64::new(0),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Highest modify time observed for `label`, zero if none yet.
    pub(crate) fn last_mtime(&self, label: &str) -> i64 {
        self.read_state().last_mtimes.get(label).copied().unwrap_or(0)
    }

    /// The watermark handed to the store: the last fetch time shifted by
    /// the skew offset, never below the epoch.
    pub(crate) fn last_fetch_time(&self) -> i64 {
        let last = self.read_state().last_fetch_time;
        let shifted = last + self.diff_time_secs;
        if shifted < 0 {
            last
        } else {
            shifted
        }
    }

    pub(crate) fn is_first_update(&self) -> bool {
        self.read_state().first_update
    }

    pub(crate) fn reset_last_mtime(&self, label: &str) {
        self.write_state().last_mtimes.insert(label.to_string(), 0);
    }

    pub(crate) fn reset_last_fetch_time(&self) {
        self.write_state().last_fetch_time = 1;
    }

    pub(crate) fn clear(&self) {
        let mut state = self.write_state();
        state.last_mtimes.clear();
        state.last_fetch_time = 1;
        state.first_update = true;
    }

    /// Coalesce with any refresh already in flight for this cache.
    pub(crate) async fn refresh<F, Fut>(&self, f: F) -> meshreg_core::Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = meshreg_core::Result<()>>,
    {
        self.flight.run(f).await
    }

    /// One refresh round around a kind-specific fetch.
    ///
    /// Reads the store clock first (a failed read keeps the previous
    /// watermark and the round proceeds), runs the executor, then
    /// assigns `last_fetch_time` unconditionally. Watermarks and the
    /// `first_update` flag only advance when the executor succeeded; a
    /// fetch error leaves them untouched so the next tick retries the
    /// same window.
    pub(crate) async fn do_cache_update<F, Fut>(
        &self,
        name: &str,
        executor: F,
    ) -> meshreg_core::Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = meshreg_core::Result<FetchOutcome>>,
    {
        let cur_store_time = match self.store.get_unix_second().await {
            Ok(secs) => secs,
            Err(err) => {
                let previous = self.read_state().last_fetch_time;
                warn!(
                    cache = name,
                    error = %err,
                    "failed to read store timestamp, keeping previous fetch watermark"
                );
                previous
            }
        };

        let started = Instant::now();
        let result = executor().await;

        let mut state = self.write_state();
        state.last_fetch_time = cur_store_time;
        let (mtimes, total) = result?;

        if let Some(mtimes) = mtimes {
            for (label, mtime) in mtimes {
                let previous = state.last_mtimes.get(&label).copied().unwrap_or(0);
                if mtime > previous {
                    info!(
                        cache = name,
                        label = %label,
                        from = previous,
                        to = mtime,
                        "last mtime advanced"
                    );
                    state.last_mtimes.insert(label, mtime);
                }
            }
        }
        state.first_update = false;

        debug!(
            cache = name,
            records = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache refresh applied"
        );
        Ok(())
    }

    /// Log the current watermark at most once per two minutes.
    pub(crate) fn log_last_mtime(&self, name: &str, label: &str) {
        let now = unix_now();
        let logged = self.last_mtime_logged.load(Ordering::Relaxed);
        if logged == 0 || now - logged >= MTIME_LOG_INTERVAL_SECS {
            self.last_mtime_logged.store(now, Ordering::Relaxed);
            info!(cache = name, last_mtime = self.last_mtime(label), "current last mtime");
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RefreshState> {
        self.state.read().expect("refresh state lock poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RefreshState> {
        self.state.write().expect("refresh state lock poisoned")
    }
}

/// Current unix seconds of the *local* clock.
///
/// Only used for pacing (watermark log throttling, drift-check gating),
/// never for fetch windows.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Deduplicates concurrent executions: the first caller runs the
/// closure, callers arriving while it runs wait for it and return
/// without running their own.
pub(crate) struct SingleFlight {
    generation: AtomicU64,
    lock: tokio::sync::Mutex<()>,
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) async fn run<F, Fut>(&self, f: F) -> meshreg_core::Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = meshreg_core::Result<()>>,
    {
        let entered_at = self.generation.load(Ordering::Acquire);
        let _guard = self.lock.lock().await;
        if self.generation.load(Ordering::Acquire) != entered_at {
            // A round finished while we waited for the lock; its result
            // stands for ours.
            return Ok(());
        }
        let result = f().await;
        self.generation.fetch_add(1, Ordering::Release);
        result
    }
}
