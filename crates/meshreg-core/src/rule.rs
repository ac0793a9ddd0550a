//! Governance rule records: routing, rate-limit, circuit-breaker, and
//! fault-detect rules.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The wildcard element in a rule target; matches every namespace or
/// service.
pub const MATCH_ALL: &str = "*";

/// A routing configuration record, keyed by the service id it governs.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Service id this configuration belongs to.
    pub id: String,
    /// Inbound routing rules payload.
    pub in_bounds: String,
    /// Outbound routing rules payload.
    pub out_bounds: String,
    /// Content revision of this record.
    pub revision: String,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}

/// Classification of a rate-limit match argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchArgumentKind {
    /// Caller-defined label.
    Custom,
    /// Request method.
    Method,
    /// Request header, keyed by header name.
    Header,
    /// Query parameter, keyed by parameter name.
    Query,
    /// Calling service, keyed by namespace.
    CallerService,
    /// Caller ip address.
    CallerIp,
}

/// One match argument of a rate-limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchArgument {
    /// What this argument matches on.
    pub kind: MatchArgumentKind,
    /// Argument key; meaning depends on `kind`.
    pub key: String,
    /// Value to match.
    pub value: String,
}

const LABEL_KEY_METHOD: &str = "$method";
const LABEL_KEY_HEADER: &str = "$header";
const LABEL_KEY_QUERY: &str = "$query";
const LABEL_KEY_CALLER_SERVICE: &str = "$caller_service";
const LABEL_KEY_CALLER_IP: &str = "$caller_ip";

/// A rate-limit rule mirrored from the store.
///
/// Older records carry their match conditions in the legacy `labels`
/// JSON field; newer ones use the `arguments` list. The cache normalizes
/// on ingest via [`RateLimit::adapt_arguments_and_labels`] so readers
/// always see both representations.
#[derive(Debug, Clone)]
pub struct RateLimit {
    /// Store-issued rule id.
    pub id: String,
    /// Service this rule applies to.
    pub service_id: String,
    /// Rule name.
    pub name: String,
    /// Method the rule applies to, empty for all.
    pub method: String,
    /// Legacy match conditions as a JSON object of label -> value.
    pub labels: String,
    /// Match conditions as a structured argument list.
    pub arguments: Vec<MatchArgument>,
    /// Normalized label view derived from `arguments` (or parsed from
    /// `labels` for legacy records).
    pub label_map: HashMap<String, String>,
    /// Rule priority, lower wins.
    pub priority: u32,
    /// Rule payload (quota, window, action).
    pub rule: String,
    /// Content revision of this record.
    pub revision: String,
    /// Whether the rule is administratively disabled.
    pub disable: bool,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}

impl RateLimit {
    /// Normalize the two match-condition representations into each other
    /// so readers always see both.
    ///
    /// New-style records (non-empty `arguments`) get `label_map` derived
    /// from the argument list; legacy records (empty `arguments`,
    /// non-empty `labels`) get `arguments` parsed out of the JSON.
    pub fn adapt_arguments_and_labels(&mut self) -> Result<(), serde_json::Error> {
        let labels = arguments_to_labels(&self.arguments);
        if !labels.is_empty() {
            self.label_map = labels;
            return Ok(());
        }
        self.labels_to_arguments()
    }

    /// Parse the legacy `labels` JSON into the `arguments` list.
    ///
    /// No-op when `arguments` is already populated or `labels` is empty.
    pub fn labels_to_arguments(&mut self) -> Result<(), serde_json::Error> {
        if !self.arguments.is_empty() || self.labels.is_empty() {
            return Ok(());
        }
        let parsed: HashMap<String, String> = serde_json::from_str(&self.labels)?;
        for (key, value) in &parsed {
            self.arguments.push(MatchArgument {
                kind: MatchArgumentKind::Custom,
                key: key.clone(),
                value: value.clone(),
            });
        }
        self.label_map = parsed;
        Ok(())
    }
}

/// Project a structured argument list onto the legacy label model.
pub fn arguments_to_labels(arguments: &[MatchArgument]) -> HashMap<String, String> {
    let mut labels = HashMap::with_capacity(arguments.len());
    for argument in arguments {
        let key = match argument.kind {
            MatchArgumentKind::Custom => argument.key.clone(),
            MatchArgumentKind::Method => LABEL_KEY_METHOD.to_string(),
            MatchArgumentKind::Header => format!("{}.{}", LABEL_KEY_HEADER, argument.key),
            MatchArgumentKind::Query => format!("{}.{}", LABEL_KEY_QUERY, argument.key),
            MatchArgumentKind::CallerService => {
                format!("{}.{}", LABEL_KEY_CALLER_SERVICE, argument.key)
            }
            MatchArgumentKind::CallerIp => LABEL_KEY_CALLER_IP.to_string(),
        };
        labels.insert(key, argument.value.clone());
    }
    labels
}

/// A circuit-breaker rule mirrored from the store.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRule {
    /// Store-issued rule id.
    pub id: String,
    /// Rule name.
    pub name: String,
    /// Namespace the rule record lives in.
    pub namespace: String,
    /// Break level (service, method, group, instance).
    pub level: u32,
    /// Source service filter, `*` for any.
    pub src_service: String,
    /// Source namespace filter, `*` for any.
    pub src_namespace: String,
    /// Target service, `*` for any.
    pub dst_service: String,
    /// Target namespace, `*` for any.
    pub dst_namespace: String,
    /// Target method filter, empty for all.
    pub dst_method: String,
    /// Rule payload (thresholds, recovery policy).
    pub rule: String,
    /// Content revision of this record.
    pub revision: String,
    /// Whether the rule is enabled.
    pub enable: bool,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}

/// A fault-detect rule mirrored from the store.
#[derive(Debug, Clone)]
pub struct FaultDetectRule {
    /// Store-issued rule id.
    pub id: String,
    /// Rule name.
    pub name: String,
    /// Namespace the rule record lives in.
    pub namespace: String,
    /// Human-readable description.
    pub description: String,
    /// Target service, `*` for any.
    pub dst_service: String,
    /// Target namespace, `*` for any.
    pub dst_namespace: String,
    /// Target method filter, empty for all.
    pub dst_method: String,
    /// Rule payload (probe protocol, interval, ports).
    pub rule: String,
    /// Content revision of this record.
    pub revision: String,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limit() -> RateLimit {
        RateLimit {
            id: "rl-1".to_string(),
            service_id: "svc-1".to_string(),
            name: "per-caller".to_string(),
            method: String::new(),
            labels: String::new(),
            arguments: Vec::new(),
            label_map: HashMap::new(),
            priority: 0,
            rule: String::new(),
            revision: "r1".to_string(),
            disable: false,
            modify_time: 1,
            valid: true,
        }
    }

    #[test]
    fn legacy_labels_become_arguments() {
        let mut rule = rate_limit();
        rule.labels = r#"{"env":"prod"}"#.to_string();
        rule.adapt_arguments_and_labels().unwrap();

        assert_eq!(rule.arguments.len(), 1);
        assert_eq!(rule.arguments[0].kind, MatchArgumentKind::Custom);
        assert_eq!(rule.arguments[0].key, "env");
        assert_eq!(rule.label_map.get("env").unwrap(), "prod");
    }

    #[test]
    fn arguments_become_labels() {
        let mut rule = rate_limit();
        rule.arguments = vec![
            MatchArgument {
                kind: MatchArgumentKind::Method,
                key: String::new(),
                value: "GET".to_string(),
            },
            MatchArgument {
                kind: MatchArgumentKind::Header,
                key: "x-tenant".to_string(),
                value: "acme".to_string(),
            },
        ];
        rule.adapt_arguments_and_labels().unwrap();

        assert_eq!(rule.label_map.get("$method").unwrap(), "GET");
        assert_eq!(rule.label_map.get("$header.x-tenant").unwrap(), "acme");
    }

    #[test]
    fn malformed_legacy_labels_error() {
        let mut rule = rate_limit();
        rule.labels = "not-json".to_string();
        assert!(rule.adapt_arguments_and_labels().is_err());
    }

    #[test]
    fn empty_rule_is_noop() {
        let mut rule = rate_limit();
        rule.adapt_arguments_and_labels().unwrap();
        assert!(rule.arguments.is_empty());
        assert!(rule.label_map.is_empty());
    }
}
