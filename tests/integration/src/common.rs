//! Shared fixtures for the integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meshreg::prelude::*;

/// Store clock at test start; record mtimes sit safely below it.
pub const T0: i64 = 1_000;

pub fn instance(id: &str, service_id: &str, revision: &str, mtime: i64) -> Instance {
    Instance {
        id: id.to_string(),
        service_id: service_id.to_string(),
        host: "10.0.0.1".to_string(),
        port: 8080,
        protocol: "grpc".to_string(),
        version: "1.0".to_string(),
        weight: 100,
        healthy: true,
        isolate: false,
        metadata: HashMap::new(),
        location: Location {
            region: "eu-west".to_string(),
            zone: "eu-west-1".to_string(),
            campus: String::new(),
        },
        revision: revision.to_string(),
        modify_time: mtime,
        valid: true,
    }
}

pub fn service(id: &str, namespace: &str, name: &str, revision: &str, mtime: i64) -> Service {
    Service {
        id: id.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        revision: revision.to_string(),
        reference: String::new(),
        metadata: HashMap::new(),
        modify_time: mtime,
        valid: true,
    }
}

pub fn fault_rule(id: &str, namespace: &str, svc: &str, mtime: i64) -> FaultDetectRule {
    FaultDetectRule {
        id: id.to_string(),
        name: id.to_string(),
        namespace: "default".to_string(),
        description: String::new(),
        dst_service: svc.to_string(),
        dst_namespace: namespace.to_string(),
        dst_method: String::new(),
        rule: String::new(),
        revision: format!("rev-{id}"),
        modify_time: mtime,
        valid: true,
    }
}

pub fn test_config() -> CacheConfig {
    let mut config = CacheConfig::default();
    config.instance.need_meta = true;
    // Small pool so tests stay light; semantics are unchanged.
    config.revision.workers = 8;
    config.revision.queue_size = 4_096;
    config
}

pub async fn started_manager(store: Arc<MemoryStore>) -> CacheManager {
    let manager = CacheManager::builder()
        .store(store as Arc<dyn Store>)
        .config(test_config())
        .build()
        .expect("manager builds");
    manager.start().await.expect("manager starts");
    manager
}

/// Poll until `cond` holds; panics after ~3 seconds.
pub async fn wait_until<F>(what: &str, cond: F)
where
    F: Fn() -> bool,
{
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
