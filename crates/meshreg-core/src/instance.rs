//! Service instance records and their derived aggregates.

use std::collections::HashMap;

/// Physical location of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Region, e.g. a cloud region.
    pub region: String,
    /// Zone within the region.
    pub zone: String,
    /// Campus / data-hall within the zone.
    pub campus: String,
}

/// A service instance mirrored from the store.
///
/// Instances are value records: the store is the source of truth and the
/// cache replaces whole records on every delta. A record with
/// `valid == false` is a tombstone signaling removal.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Store-issued instance id.
    pub id: String,
    /// Id of the owning service.
    pub service_id: String,
    /// Host address.
    pub host: String,
    /// Listen port.
    pub port: u32,
    /// Wire protocol, e.g. "grpc".
    pub protocol: String,
    /// Deployed version label.
    pub version: String,
    /// Load-balancing weight.
    pub weight: u32,
    /// Health-check status.
    pub healthy: bool,
    /// Manually isolated from traffic.
    pub isolate: bool,
    /// Free-form instance metadata.
    pub metadata: HashMap<String, String>,
    /// Physical location.
    pub location: Location,
    /// Content revision of this record.
    pub revision: String,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}

impl Instance {
    /// Health predicate used for counting: isolation suppresses healthy
    /// status.
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy && !self.isolate
    }

    /// Inject the internal labels (`version`, `protocol`, `region`,
    /// `zone`, `campus`) into `metadata` so readers can match on them
    /// like any other label.
    pub fn fill_internal_labels(&mut self) {
        if !self.version.is_empty() {
            self.metadata
                .insert("version".to_string(), self.version.clone());
        }
        if !self.protocol.is_empty() {
            self.metadata
                .insert("protocol".to_string(), self.protocol.clone());
        }
        self.metadata
            .insert("region".to_string(), self.location.region.clone());
        self.metadata
            .insert("zone".to_string(), self.location.zone.clone());
        self.metadata
            .insert("campus".to_string(), self.location.campus.clone());
    }
}

/// Per-service instance statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceCount {
    /// Total live instances.
    pub total: u32,
    /// Instances passing the health predicate.
    pub healthy: u32,
    /// Instances in isolation.
    pub isolated: u32,
}

/// The label universe of a service: every metadata key mapped to the set
/// of values observed across the service's instances.
#[derive(Debug, Clone, Default)]
pub struct InstanceLabels {
    /// label key -> sorted distinct values.
    pub labels: HashMap<String, Vec<String>>,
}
