//! The rule fan-out engine shared by the fault-detect and
//! circuit-breaker caches.
//!
//! Rules target a `(dst_namespace, dst_service)` pair where either
//! element may be `"*"`. Instead of matching at read time, every rule is
//! materialized into all the buckets it applies to when it is inserted,
//! so a lookup is a single map probe:
//!
//! - `svc_specific[ns][svc]`: concrete targets,
//! - `ns_wildcard[ns]`: `service == "*"` targets,
//! - `all_wildcard`: the `(*, *)` bucket.
//!
//! Lookup precedence is strict: a service-specific bucket wins even when
//! it holds zero rules, which is how a service is explicitly opted out.
//!
//! A bucket created after a wildcard rule arrived is seeded from the
//! wilder buckets it shadows, so materialization is independent of
//! arrival order.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use meshreg_core::revision::composite_revision;
use meshreg_core::{CircuitBreakerRule, FaultDetectRule, ServiceKey, MATCH_ALL};

/// The uniform shape the fan-out engine needs from a rule record.
pub trait FanoutRule: Send + Sync + 'static {
    /// Store-issued rule id.
    fn id(&self) -> &str;
    /// Content revision of the record.
    fn revision(&self) -> &str;
    /// Target namespace, `"*"` for any.
    fn dst_namespace(&self) -> &str;
    /// Target service, `"*"` for any.
    fn dst_service(&self) -> &str;
}

impl FanoutRule for FaultDetectRule {
    fn id(&self) -> &str {
        &self.id
    }
    fn revision(&self) -> &str {
        &self.revision
    }
    fn dst_namespace(&self) -> &str {
        &self.dst_namespace
    }
    fn dst_service(&self) -> &str {
        &self.dst_service
    }
}

impl FanoutRule for CircuitBreakerRule {
    fn id(&self) -> &str {
        &self.id
    }
    fn revision(&self) -> &str {
        &self.revision
    }
    fn dst_namespace(&self) -> &str {
        &self.dst_namespace
    }
    fn dst_service(&self) -> &str {
        &self.dst_service
    }
}

/// One bucket: the rules targeting a service key, plus an aggregate
/// revision over their record revisions.
///
/// The bucket oscillates between *empty* (revision `""`) and *populated*
/// (revision = digest); the transition happens on every add or remove.
pub struct ServiceRules<R> {
    service: ServiceKey,
    rules: RwLock<HashMap<String, Arc<R>>>,
    revision: RwLock<String>,
}

impl<R: FanoutRule> ServiceRules<R> {
    fn new(service: ServiceKey) -> Self {
        Self {
            service,
            rules: RwLock::new(HashMap::new()),
            revision: RwLock::new(String::new()),
        }
    }

    /// The service key this bucket belongs to (wildcards included).
    pub fn service(&self) -> &ServiceKey {
        &self.service
    }

    /// Aggregate revision; empty while the bucket holds no rules.
    pub fn revision(&self) -> String {
        self.revision.read().expect("rule revision lock poisoned").clone()
    }

    /// Number of rules in the bucket.
    pub fn count(&self) -> usize {
        self.read_rules().len()
    }

    /// Whether the bucket holds no rules.
    pub fn is_empty(&self) -> bool {
        self.read_rules().is_empty()
    }

    /// Snapshot of the bucket's rules.
    pub fn rules(&self) -> Vec<Arc<R>> {
        self.read_rules().values().cloned().collect()
    }

    /// Visit every rule in the bucket.
    pub fn iterate<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<R>),
    {
        for rule in self.read_rules().values() {
            f(rule);
        }
    }

    fn add_rule(&self, rule: Arc<R>) {
        self.write_rules().insert(rule.id().to_string(), rule);
        self.reload_revision();
    }

    fn del_rule(&self, id: &str) {
        self.write_rules().remove(id);
        self.reload_revision();
    }

    fn clear(&self) {
        self.write_rules().clear();
        *self.revision.write().expect("rule revision lock poisoned") = String::new();
    }

    fn reload_revision(&self) {
        let revisions: Vec<String> = {
            let rules = self.read_rules();
            rules.values().map(|r| r.revision().to_string()).collect()
        };
        let revision = if revisions.is_empty() {
            String::new()
        } else {
            composite_revision(revisions)
        };
        *self.revision.write().expect("rule revision lock poisoned") = revision;
    }

    fn read_rules(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<R>>> {
        self.rules.read().expect("rule bucket lock poisoned")
    }

    fn write_rules(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<R>>> {
        self.rules.write().expect("rule bucket lock poisoned")
    }
}

struct FanoutState<R> {
    /// namespace -> service -> bucket.
    svc_specific: HashMap<String, HashMap<String, Arc<ServiceRules<R>>>>,
    /// namespace -> bucket for `service == "*"` targets.
    ns_wildcard: HashMap<String, Arc<ServiceRules<R>>>,
    /// The `(*, *)` bucket.
    all_wildcard: Arc<ServiceRules<R>>,
}

/// Fan-out storage for one rule kind.
pub(crate) struct RuleFanout<R> {
    state: RwLock<FanoutState<R>>,
}

impl<R: FanoutRule> RuleFanout<R> {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(FanoutState {
                svc_specific: HashMap::new(),
                ns_wildcard: HashMap::new(),
                all_wildcard: Arc::new(ServiceRules::new(ServiceKey::new(MATCH_ALL, MATCH_ALL))),
            }),
        }
    }

    /// The bucket governing `(service, namespace)`: service-specific,
    /// else namespace-wildcard, else the global bucket. The first hit
    /// wins even when its rule set is empty.
    pub(crate) fn lookup(&self, service: &str, namespace: &str) -> Arc<ServiceRules<R>> {
        let state = self.read_state();
        if let Some(buckets) = state.svc_specific.get(namespace) {
            if let Some(bucket) = buckets.get(service) {
                return Arc::clone(bucket);
            }
        }
        if let Some(bucket) = state.ns_wildcard.get(namespace) {
            return Arc::clone(bucket);
        }
        Arc::clone(&state.all_wildcard)
    }

    /// Materialize a rule into every bucket it applies to.
    pub(crate) fn store_rule(&self, rule: Arc<R>) {
        let mut state = self.write_state();
        let namespace = rule.dst_namespace().to_string();
        let service = rule.dst_service().to_string();

        if namespace == MATCH_ALL && service == MATCH_ALL {
            state.all_wildcard.add_rule(Arc::clone(&rule));
            for bucket in state.ns_wildcard.values() {
                bucket.add_rule(Arc::clone(&rule));
            }
            for buckets in state.svc_specific.values() {
                for bucket in buckets.values() {
                    bucket.add_rule(Arc::clone(&rule));
                }
            }
            return;
        }

        if service == MATCH_ALL {
            let bucket = ensure_ns_wildcard(&mut state, &namespace);
            bucket.add_rule(Arc::clone(&rule));
            if let Some(buckets) = state.svc_specific.get(&namespace) {
                for bucket in buckets.values() {
                    bucket.add_rule(Arc::clone(&rule));
                }
            }
            return;
        }

        let bucket = ensure_svc_specific(&mut state, &namespace, &service);
        bucket.add_rule(rule);
    }

    /// Remove a rule from every bucket it was materialized into.
    pub(crate) fn delete_rule(&self, rule: &R) {
        let state = self.write_state();
        let namespace = rule.dst_namespace();
        let service = rule.dst_service();
        let id = rule.id();

        if namespace == MATCH_ALL && service == MATCH_ALL {
            state.all_wildcard.del_rule(id);
            for bucket in state.ns_wildcard.values() {
                bucket.del_rule(id);
            }
            for buckets in state.svc_specific.values() {
                for bucket in buckets.values() {
                    bucket.del_rule(id);
                }
            }
            return;
        }

        if service == MATCH_ALL {
            if let Some(bucket) = state.ns_wildcard.get(namespace) {
                bucket.del_rule(id);
            }
            if let Some(buckets) = state.svc_specific.get(namespace) {
                for bucket in buckets.values() {
                    bucket.del_rule(id);
                }
            }
            return;
        }

        if let Some(buckets) = state.svc_specific.get(namespace) {
            if let Some(bucket) = buckets.get(service) {
                bucket.del_rule(id);
            }
        }
    }

    pub(crate) fn clear(&self) {
        let mut state = self.write_state();
        state.all_wildcard.clear();
        state.ns_wildcard.clear();
        state.svc_specific.clear();
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, FanoutState<R>> {
        self.state.read().expect("rule fanout lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, FanoutState<R>> {
        self.state.write().expect("rule fanout lock poisoned")
    }
}

/// Get or create the namespace-wildcard bucket, seeding a new one from
/// the global bucket so earlier `(*, *)` rules stay materialized.
fn ensure_ns_wildcard<R: FanoutRule>(
    state: &mut FanoutState<R>,
    namespace: &str,
) -> Arc<ServiceRules<R>> {
    if let Some(bucket) = state.ns_wildcard.get(namespace) {
        return Arc::clone(bucket);
    }
    let bucket = Arc::new(ServiceRules::new(ServiceKey::new(namespace, MATCH_ALL)));
    for rule in state.all_wildcard.rules() {
        bucket.add_rule(rule);
    }
    state
        .ns_wildcard
        .insert(namespace.to_string(), Arc::clone(&bucket));
    bucket
}

/// Get or create a service-specific bucket, seeding a new one from the
/// wilder buckets it shadows.
fn ensure_svc_specific<R: FanoutRule>(
    state: &mut FanoutState<R>,
    namespace: &str,
    service: &str,
) -> Arc<ServiceRules<R>> {
    if let Some(bucket) = state
        .svc_specific
        .get(namespace)
        .and_then(|buckets| buckets.get(service))
    {
        return Arc::clone(bucket);
    }
    let bucket = Arc::new(ServiceRules::new(ServiceKey::new(namespace, service)));
    for rule in state.all_wildcard.rules() {
        bucket.add_rule(rule);
    }
    if let Some(ns_bucket) = state.ns_wildcard.get(namespace) {
        for rule in ns_bucket.rules() {
            bucket.add_rule(rule);
        }
    }
    state
        .svc_specific
        .entry(namespace.to_string())
        .or_default()
        .insert(service.to_string(), Arc::clone(&bucket));
    bucket
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, namespace: &str, service: &str) -> Arc<FaultDetectRule> {
        Arc::new(FaultDetectRule {
            id: id.to_string(),
            name: id.to_string(),
            namespace: "default".to_string(),
            description: String::new(),
            dst_service: service.to_string(),
            dst_namespace: namespace.to_string(),
            dst_method: String::new(),
            rule: String::new(),
            revision: format!("rev-{id}"),
            modify_time: 1,
            valid: true,
        })
    }

    #[test]
    fn specific_bucket_wins() {
        let fanout: RuleFanout<FaultDetectRule> = RuleFanout::new();
        fanout.store_rule(rule("global", MATCH_ALL, MATCH_ALL));
        fanout.store_rule(rule("ns", "N", MATCH_ALL));
        fanout.store_rule(rule("svc", "N", "Svc1"));

        let bucket = fanout.lookup("Svc1", "N");
        assert_eq!(bucket.service(), &ServiceKey::new("N", "Svc1"));
        // Wildcard rules are materialized into the specific bucket.
        assert_eq!(bucket.count(), 3);
    }

    #[test]
    fn wildcard_rules_seed_later_buckets() {
        let fanout: RuleFanout<FaultDetectRule> = RuleFanout::new();
        // Wildcards first, specific bucket created afterwards.
        fanout.store_rule(rule("ns", "N", MATCH_ALL));
        fanout.store_rule(rule("svc", "N", "Svc1"));

        let bucket = fanout.lookup("Svc1", "N");
        let ids: Vec<String> = bucket.rules().iter().map(|r| r.id.clone()).collect();
        assert!(ids.contains(&"ns".to_string()));
        assert!(ids.contains(&"svc".to_string()));
    }

    #[test]
    fn lookup_precedence_chain() {
        let fanout: RuleFanout<FaultDetectRule> = RuleFanout::new();
        fanout.store_rule(rule("global", MATCH_ALL, MATCH_ALL));
        fanout.store_rule(rule("ns", "N", MATCH_ALL));

        // No specific bucket for Svc2: namespace wildcard wins.
        let bucket = fanout.lookup("Svc2", "N");
        assert_eq!(bucket.service(), &ServiceKey::new("N", MATCH_ALL));

        // Unknown namespace: global bucket.
        let bucket = fanout.lookup("Svc1", "M");
        assert_eq!(bucket.service(), &ServiceKey::new(MATCH_ALL, MATCH_ALL));
    }

    #[test]
    fn empty_specific_bucket_still_wins() {
        let fanout: RuleFanout<FaultDetectRule> = RuleFanout::new();
        let specific = rule("svc", "N", "Svc1");
        fanout.store_rule(Arc::clone(&specific));
        fanout.delete_rule(&specific);
        fanout.store_rule(rule("ns", "N", MATCH_ALL));

        // The bucket exists and is empty; precedence is strict, so the
        // non-empty namespace bucket must NOT shadow it...
        let bucket = fanout.lookup("Svc1", "N");
        assert_eq!(bucket.service(), &ServiceKey::new("N", "Svc1"));
        // ...but the later namespace-wildcard insert was fanned into it.
        assert_eq!(bucket.count(), 1);
    }

    #[test]
    fn bucket_revision_transitions() {
        let fanout: RuleFanout<FaultDetectRule> = RuleFanout::new();
        let one = rule("a", "N", "Svc1");
        fanout.store_rule(Arc::clone(&one));

        let bucket = fanout.lookup("Svc1", "N");
        let populated = bucket.revision();
        assert!(!populated.is_empty());
        assert_eq!(
            populated,
            composite_revision(vec!["rev-a".to_string()])
        );

        fanout.delete_rule(&one);
        assert_eq!(bucket.revision(), "");
    }

    #[test]
    fn bucket_revision_is_order_independent() {
        let forward: RuleFanout<FaultDetectRule> = RuleFanout::new();
        forward.store_rule(rule("a", "N", "Svc1"));
        forward.store_rule(rule("b", "N", "Svc1"));

        let reverse: RuleFanout<FaultDetectRule> = RuleFanout::new();
        reverse.store_rule(rule("b", "N", "Svc1"));
        reverse.store_rule(rule("a", "N", "Svc1"));

        assert_eq!(
            forward.lookup("Svc1", "N").revision(),
            reverse.lookup("Svc1", "N").revision()
        );
    }

    #[test]
    fn global_rule_reaches_every_bucket() {
        let fanout: RuleFanout<FaultDetectRule> = RuleFanout::new();
        fanout.store_rule(rule("svc", "N", "Svc1"));
        fanout.store_rule(rule("ns", "M", MATCH_ALL));
        fanout.store_rule(rule("global", MATCH_ALL, MATCH_ALL));

        assert_eq!(fanout.lookup("Svc1", "N").count(), 2);
        assert_eq!(fanout.lookup("anything", "M").count(), 2);
        assert_eq!(fanout.lookup("anything", "unknown").count(), 1);
    }

    #[test]
    fn ns_wildcard_delete_reaches_specific_buckets() {
        let fanout: RuleFanout<FaultDetectRule> = RuleFanout::new();
        let ns = rule("ns", "N", MATCH_ALL);
        fanout.store_rule(Arc::clone(&ns));
        fanout.store_rule(rule("svc", "N", "Svc1"));
        assert_eq!(fanout.lookup("Svc1", "N").count(), 2);

        fanout.delete_rule(&ns);
        let bucket = fanout.lookup("Svc1", "N");
        assert_eq!(bucket.count(), 1);
        assert_eq!(bucket.rules()[0].id, "svc");
    }

    #[test]
    fn clear_resets_everything() {
        let fanout: RuleFanout<FaultDetectRule> = RuleFanout::new();
        fanout.store_rule(rule("global", MATCH_ALL, MATCH_ALL));
        fanout.store_rule(rule("svc", "N", "Svc1"));
        fanout.clear();

        let bucket = fanout.lookup("Svc1", "N");
        assert_eq!(bucket.service(), &ServiceKey::new(MATCH_ALL, MATCH_ALL));
        assert!(bucket.is_empty());
        assert_eq!(bucket.revision(), "");
    }
}
