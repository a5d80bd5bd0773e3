//! Error types for relay operations

use thiserror::Error;

/// Failures of the collection store collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on collection '{collection}': {source}")]
    Io {
        collection: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error on collection '{collection}': {source}")]
    Serialization {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(collection: &str, source: std::io::Error) -> Self {
        StoreError::Io {
            collection: collection.to_string(),
            source,
        }
    }

    pub fn serialization(collection: &str, source: serde_json::Error) -> Self {
        StoreError::Serialization {
            collection: collection.to_string(),
            source,
        }
    }
}

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RelayError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        RelayError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(err: tokio::task::JoinError) -> Self {
        RelayError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = RelayError::not_found("response rule", "abc");
        assert_eq!(err.to_string(), "response rule not found: abc");
    }

    #[test]
    fn test_store_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: RelayError = StoreError::io("requests", io).into();
        assert!(matches!(err, RelayError::Store(StoreError::Io { .. })));
        assert!(err.to_string().contains("requests"));
    }
}
