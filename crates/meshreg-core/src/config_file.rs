//! Configuration-file release records.

/// A released configuration file mirrored from the store.
#[derive(Debug, Clone)]
pub struct ConfigFileRelease {
    /// Store-issued release id.
    pub id: String,
    /// Namespace the file lives in.
    pub namespace: String,
    /// File group within the namespace.
    pub group: String,
    /// File name within the group.
    pub file_name: String,
    /// Released file content.
    pub content: String,
    /// Content revision of this release.
    pub revision: String,
    /// Last modification time, unix seconds in the store's clock.
    pub modify_time: i64,
    /// False marks a tombstone.
    pub valid: bool,
}

impl ConfigFileRelease {
    /// The cache key of this release.
    pub fn key(&self) -> String {
        release_key(&self.namespace, &self.group, &self.file_name)
    }
}

/// Build the cache key for a config-file release.
pub fn release_key(namespace: &str, group: &str, file_name: &str) -> String {
    format!("{namespace}+{group}+{file_name}")
}
