//! Listener glue: typed event callbacks fired by the refresh tasks.
//!
//! Callbacks run synchronously in the task that generated the event, so
//! implementations must be fast and must not block.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The entity appeared for the first time.
    Created,
    /// The entity was modified.
    Updated,
    /// The entity was tombstoned.
    Deleted,
}

/// Callbacks for one entity kind. All hooks default to no-ops so
/// implementations override only what they care about.
pub trait CacheListener<T>: Send + Sync {
    /// An entity appeared for the first time.
    fn on_created(&self, _value: &Arc<T>) {}

    /// An entity was modified.
    fn on_updated(&self, _value: &Arc<T>) {}

    /// An entity was tombstoned.
    fn on_deleted(&self, _value: &Arc<T>) {}

    /// A refresh batch finished; `affected` holds the service ids it
    /// touched. Fired once per batch, coalesced.
    fn on_batch_reloaded(&self, _affected: &HashSet<String>) {}
}

pub(crate) struct ListenerManager<T> {
    listeners: RwLock<Vec<Arc<dyn CacheListener<T>>>>,
}

impl<T> ListenerManager<T> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn CacheListener<T>>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    pub(crate) fn emit(&self, kind: EventKind, value: &Arc<T>) {
        let listeners = self.listeners.read().expect("listener lock poisoned");
        for listener in listeners.iter() {
            match kind {
                EventKind::Created => listener.on_created(value),
                EventKind::Updated => listener.on_updated(value),
                EventKind::Deleted => listener.on_deleted(value),
            }
        }
    }

    pub(crate) fn emit_reload(&self, affected: &HashSet<String>) {
        let listeners = self.listeners.read().expect("listener lock poisoned");
        for listener in listeners.iter() {
            listener.on_batch_reloaded(affected);
        }
    }
}
