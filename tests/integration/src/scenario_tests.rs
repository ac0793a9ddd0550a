//! End-to-end scenarios: snapshot, incremental update, tombstone, rule
//! fan-out, alias handling, clear-and-remirror.

use std::sync::Arc;

use meshreg::core::revision::compute_revision;
use meshreg::prelude::*;

use crate::common::*;

fn revisions(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn first_run_snapshot_then_increment_then_tombstone() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    store.put_service(service("S1", "default", "checkout", "svc", 900));
    store.put_instances([
        instance("ins-a", "S1", "a", 900),
        instance("ins-b", "S1", "b", 900),
        instance("ins-c", "S1", "c", 900),
    ]);

    let manager = started_manager(Arc::clone(&store)).await;

    // (a) first-run snapshot: counts and the aggregate revision.
    let expected = compute_revision("svc", revisions(&["a", "b", "c"]));
    wait_until("first-run revision", || {
        manager.service_instance_revision("S1").as_deref() == Some(expected.as_str())
    })
    .await;
    assert_eq!(
        manager.instance().get_instance_count_by_service_id("S1").total,
        3
    );
    assert_eq!(manager.instance().get_service_ports("S1"), vec![8080]);

    // (b) incremental update: a fourth instance arrives later.
    store.advance_clock(10);
    store.put_instance(instance("ins-d", "S1", "d", T0 + 5));
    manager.update().await;

    let expected = compute_revision("svc", revisions(&["a", "b", "c", "d"]));
    wait_until("incremental revision", || {
        manager.service_instance_revision("S1").as_deref() == Some(expected.as_str())
    })
    .await;
    assert_eq!(
        manager.instance().get_instance_count_by_service_id("S1").total,
        4
    );

    // (c) tombstone: instance b is re-emitted with valid=false.
    store.advance_clock(10);
    store.tombstone_instance("ins-b", T0 + 15);
    manager.update().await;

    let expected = compute_revision("svc", revisions(&["a", "c", "d"]));
    wait_until("post-tombstone revision", || {
        manager.service_instance_revision("S1").as_deref() == Some(expected.as_str())
    })
    .await;
    assert!(manager.instance().get_instance("ins-b").is_none());
    assert_eq!(manager.instance().get_instances_by_service_id("S1").len(), 3);
    assert_eq!(
        manager.instance().get_instance_count_by_service_id("S1").total,
        3
    );

    manager.shutdown();
}

#[tokio::test]
async fn fault_detect_fanout_precedence() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    store.put_fault_detect_rule(fault_rule("R1", "N", MATCH_ALL, 900));
    store.put_fault_detect_rule(fault_rule("R2", "N", "Svc1", 900));

    let manager = started_manager(Arc::clone(&store)).await;

    // Service-specific bucket sees both the wildcard and its own rule.
    let svc1 = manager.fault_detect().rules_for("Svc1", "N");
    let mut ids: Vec<String> = svc1.rules().iter().map(|r| r.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["R1".to_string(), "R2".to_string()]);
    assert!(!svc1.revision().is_empty());

    // Unmatched service in the namespace falls to the wildcard bucket.
    let svc2 = manager.fault_detect().rules_for("Svc2", "N");
    assert_eq!(svc2.count(), 1);
    assert_eq!(svc2.rules()[0].id, "R1");

    // Unknown namespace falls to the global bucket, empty here.
    let other = manager.fault_detect().rules_for("Svc1", "M");
    assert_eq!(other.service(), &ServiceKey::new(MATCH_ALL, MATCH_ALL));
    assert!(other.is_empty());
    assert_eq!(other.revision(), "");

    // Deleting the wildcard rule pulls it out of every bucket.
    store.advance_clock(10);
    let mut dead = fault_rule("R1", "N", MATCH_ALL, T0 + 5);
    dead.valid = false;
    store.put_fault_detect_rule(dead);
    manager.update().await;

    let svc1 = manager.fault_detect().rules_for("Svc1", "N");
    assert_eq!(svc1.count(), 1);
    assert_eq!(svc1.rules()[0].id, "R2");

    manager.shutdown();
}

#[tokio::test]
async fn alias_has_no_independent_revision() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    store.put_service(service("S1", "default", "checkout", "svc", 900));
    let mut alias = service("A1", "default", "checkout-alias", "alias-rev", 900);
    alias.reference = "S1".to_string();
    store.put_service(alias);
    store.put_instance(instance("ins-a", "S1", "a", 900));

    let manager = started_manager(Arc::clone(&store)).await;

    wait_until("target revision", || {
        manager.service_instance_revision("S1").is_some()
    })
    .await;

    // The alias is resolvable but owns no aggregate revision.
    assert_eq!(
        manager.service().get_alias_target("A1").as_deref(),
        Some("S1")
    );
    assert!(manager.service_instance_revision("A1").is_none());
    assert_eq!(manager.revision_count(), 1);

    manager.shutdown();
}

#[tokio::test]
async fn clear_then_remirror() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);
    store.put_service(service("S1", "default", "checkout", "svc", 900));
    store.put_instance(instance("ins-a", "S1", "a", 900));

    let manager = started_manager(Arc::clone(&store)).await;
    wait_until("initial revision", || {
        manager.service_instance_revision("S1").is_some()
    })
    .await;

    manager.clear();
    assert_eq!(manager.instance().instance_count(), 0);
    assert_eq!(manager.service().service_count(), 0);
    assert!(manager.service_instance_revision("S1").is_none());

    // The next round re-mirrors from scratch (first_update is set
    // again, so the store returns a full snapshot).
    manager.update().await;
    wait_until("revision after remirror", || {
        manager.service_instance_revision("S1").is_some()
    })
    .await;
    assert_eq!(manager.instance().instance_count(), 1);
    assert_eq!(
        manager.instance().get_instance_count_by_service_id("S1").total,
        1
    );

    manager.shutdown();
}

#[tokio::test]
async fn secondary_caches_mirror_their_kinds() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(T0);

    store.put_namespace(Namespace {
        name: "default".to_string(),
        comment: String::new(),
        owner: "ops".to_string(),
        modify_time: 900,
        valid: true,
    });
    store.put_routing_config(RoutingConfig {
        id: "S1".to_string(),
        in_bounds: "[]".to_string(),
        out_bounds: "[]".to_string(),
        revision: "r1".to_string(),
        modify_time: 900,
        valid: true,
    });
    store.put_rate_limit(RateLimit {
        id: "rl-1".to_string(),
        service_id: "S1".to_string(),
        name: "per-caller".to_string(),
        method: String::new(),
        labels: r#"{"env":"prod"}"#.to_string(),
        arguments: Vec::new(),
        label_map: std::collections::HashMap::new(),
        priority: 1,
        rule: String::new(),
        revision: "r1".to_string(),
        disable: false,
        modify_time: 900,
        valid: true,
    });
    store.put_user(User {
        id: "u-1".to_string(),
        name: "alice".to_string(),
        owner: String::new(),
        source: "meshreg".to_string(),
        modify_time: 900,
        valid: true,
    });
    store.put_strategy(AuthStrategy {
        id: "st-1".to_string(),
        name: "readers".to_string(),
        principals: vec!["u-1".to_string()],
        resources: vec!["S1".to_string()],
        modify_time: 900,
        valid: true,
    });
    store.put_config_file_release(ConfigFileRelease {
        id: "cf-1".to_string(),
        namespace: "default".to_string(),
        group: "payments".to_string(),
        file_name: "db.toml".to_string(),
        content: "k = v".to_string(),
        revision: "r1".to_string(),
        modify_time: 900,
        valid: true,
    });

    let manager = started_manager(Arc::clone(&store)).await;

    assert!(manager.namespace().get_namespace("default").is_some());
    assert!(manager.routing().get_routing_config("S1").is_some());

    // Legacy labels were normalized on ingest.
    let limits = manager.rate_limit().get_rate_limits_by_service_id("S1");
    assert_eq!(limits.len(), 1);
    assert_eq!(limits[0].arguments.len(), 1);
    assert_eq!(limits[0].label_map.get("env").map(String::as_str), Some("prod"));

    assert_eq!(manager.user().get_user_by_name("alice").unwrap().id, "u-1");
    assert_eq!(manager.strategy().strategies_by_principal("u-1").len(), 1);
    assert!(manager
        .config_file()
        .get_release("default", "payments", "db.toml")
        .is_some());

    manager.shutdown();
}
