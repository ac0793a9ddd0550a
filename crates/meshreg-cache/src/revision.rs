//! The revision worker pool.
//!
//! Instance and service refreshes enqueue compute jobs onto a bounded
//! queue; a pool of workers drains it and maintains the service-id →
//! aggregate-revision map. The queue is the one piece of intentional
//! backpressure in the core: it is large enough to absorb bursts, but a
//! stalled pool will eventually slow the instance refresh down instead
//! of growing without bound.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use meshreg_core::revision::compute_revision;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error};

use crate::config::RevisionOptions;
use crate::instance::InstanceCache;
use crate::service::ServiceCache;

/// A revision-compute job: recompute (or drop) the aggregate revision of
/// one service.
#[derive(Debug, Clone)]
pub struct RevisionNotify {
    pub(crate) service_id: String,
    pub(crate) valid: bool,
}

impl RevisionNotify {
    pub(crate) fn new(service_id: impl Into<String>, valid: bool) -> Self {
        Self {
            service_id: service_id.into(),
            valid,
        }
    }
}

/// The service-id → aggregate-revision map maintained by the pool.
///
/// An absent entry means "not yet computed"; callers fall back to the
/// service's own revision.
#[derive(Default)]
pub struct RevisionMap {
    revisions: RwLock<HashMap<String, String>>,
}

impl RevisionMap {
    /// The aggregate revision of a service, if computed.
    pub fn get(&self, service_id: &str) -> Option<String> {
        self.read().get(service_id).cloned()
    }

    /// Number of computed revisions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no revision has been computed yet.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn set(&self, service_id: &str, revision: String) {
        self.write().insert(service_id.to_string(), revision);
    }

    pub(crate) fn delete(&self, service_id: &str) {
        self.write().remove(service_id);
    }

    pub(crate) fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.revisions.read().expect("revision map lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.revisions.write().expect("revision map lock poisoned")
    }
}

/// Spawn the worker pool. Workers share the receiver and exit on the
/// shutdown signal or when the queue closes.
pub(crate) fn spawn_revision_workers(
    options: &RevisionOptions,
    receiver: mpsc::Receiver<RevisionNotify>,
    services: Arc<ServiceCache>,
    instances: Arc<InstanceCache>,
    revisions: Arc<RevisionMap>,
    shutdown: watch::Receiver<bool>,
) {
    let receiver = Arc::new(Mutex::new(receiver));
    let sleep = Duration::from_millis(options.inter_work_sleep_ms);
    for worker in 0..options.workers {
        tokio::spawn(revision_worker_loop(
            worker,
            Arc::clone(&receiver),
            Arc::clone(&services),
            Arc::clone(&instances),
            Arc::clone(&revisions),
            shutdown.clone(),
            sleep,
        ));
    }
}

async fn revision_worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<RevisionNotify>>>,
    services: Arc<ServiceCache>,
    instances: Arc<InstanceCache>,
    revisions: Arc<RevisionMap>,
    mut shutdown: watch::Receiver<bool>,
    sleep: Duration,
) {
    debug!(worker, "revision worker started");
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                job = receiver.recv() => job,
                _ = shutdown.changed() => None,
            }
        };
        let Some(job) = job else {
            break;
        };
        if process_revision_job(&job, &services, &instances, &revisions) {
            tokio::time::sleep(sleep).await;
        }
    }
    debug!(worker, "revision worker stopped");
}

/// Handle one job. Returns whether a revision was actually written or
/// removed (successful work earns the inter-work pause).
pub(crate) fn process_revision_job(
    job: &RevisionNotify,
    services: &ServiceCache,
    instances: &InstanceCache,
    revisions: &RevisionMap,
) -> bool {
    if job.service_id.is_empty() {
        error!("revision job carries an empty service id, dropping");
        return false;
    }

    if !job.valid {
        revisions.delete(&job.service_id);
        debug!(service_id = %job.service_id, "service revision removed");
        return true;
    }

    // Unknown id: an alias, or the service cache has not mirrored it
    // yet. The next instance refresh re-enqueues, so ordering between
    // the two caches is self-healing.
    let Some(service) = services.get_service_by_id(&job.service_id) else {
        return false;
    };

    let instance_revisions = instances
        .get_instances_by_service_id(&job.service_id)
        .into_iter()
        .map(|instance| instance.revision.clone());
    let revision = compute_revision(&service.revision, instance_revisions);
    revisions.set(&job.service_id, revision.clone());
    debug!(service_id = %job.service_id, revision = %revision, "service instance revision computed");
    true
}
