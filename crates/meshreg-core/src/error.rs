//! Error types for cache operations.

/// Error type for the caching core.
///
/// Nothing here is fatal at runtime: store failures leave indexes
/// untouched and are retried on the next tick, malformed records are
/// dropped, and setup mistakes surface from the manager builder before
/// anything is running.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The durable store failed or timed out.
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Two caches were registered under the same resource name.
    #[error("duplicate cache resource: {name}")]
    DuplicateResource {
        /// The conflicting resource name.
        name: String,
    },

    /// A record from the store is missing required fields.
    #[error("malformed record: {reason}")]
    MalformedRecord {
        /// Why the record was rejected.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Create a store error from any error type.
    pub fn store<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a store error with no underlying cause.
    pub fn store_msg(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CacheError::DuplicateResource {
            name: "instance".to_string(),
        };
        assert!(err.to_string().contains("instance"));
    }

    #[test]
    fn store_error_helper() {
        let io_err = std::io::Error::other("connection reset");
        let err = CacheError::store("fetch failed", io_err);
        assert!(matches!(err, CacheError::Store { .. }));
        assert!(err.to_string().contains("fetch failed"));
    }
}
