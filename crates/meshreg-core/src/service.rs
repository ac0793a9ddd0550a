//! Service and namespace records.

use std::collections::HashMap;
use std::fmt;

/// A `(namespace, name)` pair identifying a service, possibly with
/// wildcard elements in rule contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    /// Namespace the service lives in.
    pub namespace: String,
    /// Service name.
    pub name: String,
}

impl ServiceKey {
    /// Create a key from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A service record mirrored from the store.
#[derive(Debug, Clone)]
pub struct Service {
    /// Store-issued service id.
    pub id: String,
    /// Namespace the service lives in.
    pub namespace: String,
    /// Service name, unique within its namespace.
    pub name: String,
    /// Content revision of this record.
    pub revision: String,
    /// Non-empty marks an alias: the id of the service this record
    /// points at.
    pub reference: String,
    /// Free-form service metadata.
    pub metadata: HashMap<String, String>,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}

impl Service {
    /// Whether this record is an alias pointing at another service.
    #[inline]
    pub fn is_alias(&self) -> bool {
        !self.reference.is_empty()
    }

    /// The `(namespace, name)` key of this service.
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// A namespace record mirrored from the store.
#[derive(Debug, Clone)]
pub struct Namespace {
    /// Namespace name (primary key).
    pub name: String,
    /// Free-form comment.
    pub comment: String,
    /// Owner of the namespace.
    pub owner: String,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}
