//! Universal invariants checked through the public API.

use std::sync::Arc;

use meshreg::core::revision::compute_revision;
use meshreg::prelude::*;

use crate::common::*;

#[tokio::test]
async fn id_and_service_indexes_agree() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    store.put_service(service("S1", "default", "a", "r1", 900));
    store.put_service(service("S2", "default", "b", "r2", 900));
    store.put_instances([
        instance("i1", "S1", "x", 900),
        instance("i2", "S1", "y", 900),
        instance("i3", "S2", "z", 900),
    ]);

    let manager = started_manager(Arc::clone(&store)).await;

    // Every instance reachable by id is reachable through its service
    // bucket, and vice versa.
    let mut by_id = 0;
    manager.instance().iterate_instances(|id, ins| {
        by_id += 1;
        let bucket = manager.instance().get_instances_by_service_id(&ins.service_id);
        assert!(bucket.iter().any(|b| b.id == id), "instance {id} missing from bucket");
        true
    });
    let by_service = manager.instance().get_instances_by_service_id("S1").len()
        + manager.instance().get_instances_by_service_id("S2").len();
    assert_eq!(by_id, 3);
    assert_eq!(by_service, 3);

    manager.shutdown();
}

#[tokio::test]
async fn counts_match_bucket_contents() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    store.put_service(service("S1", "default", "a", "r1", 900));
    let mut isolated = instance("i2", "S1", "y", 900);
    isolated.isolate = true;
    let mut unhealthy = instance("i3", "S1", "z", 900);
    unhealthy.healthy = false;
    store.put_instances([instance("i1", "S1", "x", 900), isolated, unhealthy]);

    let manager = started_manager(Arc::clone(&store)).await;

    let bucket = manager.instance().get_instances_by_service_id("S1");
    let count = manager.instance().get_instance_count_by_service_id("S1");
    assert_eq!(count.total as usize, bucket.len());
    assert_eq!(
        count.healthy as usize,
        bucket.iter().filter(|i| i.healthy && !i.isolate).count()
    );
    assert_eq!(
        count.isolated as usize,
        bucket.iter().filter(|i| i.isolate).count()
    );

    manager.shutdown();
}

#[tokio::test]
async fn revision_matches_formula_after_drain() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    store.put_service(service("S1", "default", "a", "svc-rev", 900));
    store.put_instances([
        instance("i1", "S1", "b", 900),
        instance("i2", "S1", "a", 900),
        instance("i3", "S1", "c", 900),
    ]);

    let manager = started_manager(Arc::clone(&store)).await;

    wait_until("revision computed", || {
        manager.service_instance_revision("S1").is_some()
    })
    .await;

    let instance_revisions: Vec<String> = manager
        .instance()
        .get_instances_by_service_id("S1")
        .iter()
        .map(|i| i.revision.clone())
        .collect();
    assert_eq!(
        manager.service_instance_revision("S1").unwrap(),
        compute_revision("svc-rev", instance_revisions)
    );

    manager.shutdown();
}

#[tokio::test]
async fn ingest_order_does_not_change_final_state() {
    // Same records, two stores, different insertion order.
    let records = [
        instance("i1", "S1", "x", 900),
        instance("i2", "S1", "y", 901),
        instance("i3", "S2", "z", 902),
    ];

    let forward = Arc::new(MemoryStore::new());
    forward.set_clock(T0);
    forward.put_service(service("S1", "default", "a", "r1", 900));
    forward.put_service(service("S2", "default", "b", "r2", 900));
    forward.put_instances(records.clone());

    let reverse = Arc::new(MemoryStore::new());
    reverse.set_clock(T0);
    reverse.put_service(service("S2", "default", "b", "r2", 900));
    reverse.put_service(service("S1", "default", "a", "r1", 900));
    reverse.put_instances(records.iter().rev().cloned());

    let m1 = started_manager(Arc::clone(&forward)).await;
    let m2 = started_manager(Arc::clone(&reverse)).await;

    wait_until("both revision maps filled", || {
        m1.revision_count() == 2 && m2.revision_count() == 2
    })
    .await;

    for svc in ["S1", "S2"] {
        assert_eq!(
            m1.service_instance_revision(svc),
            m2.service_instance_revision(svc),
            "revision mismatch for {svc}"
        );
        assert_eq!(
            m1.instance().get_instance_count_by_service_id(svc),
            m2.instance().get_instance_count_by_service_id(svc)
        );
    }

    m1.shutdown();
    m2.shutdown();
}

#[tokio::test]
async fn reapplying_a_batch_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    // Mtimes inside the skew window (since = T0 - 5), so every round
    // re-fetches the same records.
    store.put_service(service("S1", "default", "a", "r1", T0 - 2));
    store.put_instances([
        instance("i1", "S1", "x", T0 - 2),
        instance("i2", "S1", "y", T0 - 2),
    ]);

    let manager = started_manager(Arc::clone(&store)).await;
    wait_until("revision computed", || {
        manager.service_instance_revision("S1").is_some()
    })
    .await;

    let revision = manager.service_instance_revision("S1");
    let count = manager.instance().get_instance_count_by_service_id("S1");
    let mtime = manager.instance().last_mtime();
    assert_eq!(mtime, T0 - 2);

    // Reapplying the same batch must be a no-op.
    manager.update().await;
    manager.update().await;

    assert_eq!(manager.service_instance_revision("S1"), revision);
    assert_eq!(
        manager.instance().get_instance_count_by_service_id("S1"),
        count
    );
    assert_eq!(manager.instance().last_mtime(), mtime);
    assert_eq!(manager.instance().instance_count(), 2);

    manager.shutdown();
}

#[tokio::test]
async fn deleting_everything_empties_every_index() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    store.put_service(service("S1", "default", "a", "r1", 900));
    store.put_instances([instance("i1", "S1", "x", 900), instance("i2", "S1", "y", 900)]);

    let manager = started_manager(Arc::clone(&store)).await;
    wait_until("revision computed", || {
        manager.service_instance_revision("S1").is_some()
    })
    .await;

    store.advance_clock(10);
    store.tombstone_instance("i1", T0 + 5);
    store.tombstone_instance("i2", T0 + 5);
    store.tombstone_service("S1", T0 + 5);
    manager.update().await;

    wait_until("revision map emptied", || manager.revision_count() == 0).await;
    assert_eq!(manager.instance().instance_count(), 0);
    assert!(manager.instance().get_instances_by_service_id("S1").is_empty());
    assert_eq!(
        manager.instance().get_instance_count_by_service_id("S1"),
        InstanceCount::default()
    );
    assert!(manager.service().get_service_by_id("S1").is_none());

    manager.shutdown();
}
