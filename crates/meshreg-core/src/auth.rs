//! User and authorization-strategy records.

/// A console user mirrored from the store.
#[derive(Debug, Clone)]
pub struct User {
    /// Store-issued user id.
    pub id: String,
    /// Login name, unique.
    pub name: String,
    /// Id of the owning account, empty for top-level users.
    pub owner: String,
    /// Identity source, e.g. "meshreg" or an external IdP.
    pub source: String,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}

/// An authorization strategy binding principals to resources.
#[derive(Debug, Clone)]
pub struct AuthStrategy {
    /// Store-issued strategy id.
    pub id: String,
    /// Strategy name.
    pub name: String,
    /// User ids this strategy applies to.
    pub principals: Vec<String>,
    /// Resource ids this strategy grants access to.
    pub resources: Vec<String>,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}
