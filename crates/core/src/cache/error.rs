use thiserror::Error;

/// Errors that can occur during cache operations.
///
/// Payloads are plain strings so the error can be cloned and handed to
/// every caller waiting on the same in-flight load.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
    /// The loader failed while a caller was waiting for the value.
    #[error("Failed to retrieve value for key '{key}': {cause}")]
    RetrievalFailed { key: String, cause: String },
    /// The loader failed during a background refresh. Never returned to callers.
    #[error("Background refresh failed for key '{key}': {cause}")]
    RefreshFailed { key: String, cause: String },
    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },
    #[error("Store '{store}' timed out during {operation}")]
    Timeout { store: String, operation: String },
    #[error("Malformed invalidation message: {0}")]
    MalformedMessage(String),
}

impl CacheError {
    /// Returns true for errors that mean the shared store could not be reached
    /// at all, as opposed to a request it rejected.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CacheError::ConnectionFailed(_)
                | CacheError::CircuitOpen { .. }
                | CacheError::Timeout { .. }
        )
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_display() {
        let error = CacheError::ConnectionFailed("timeout".to_string());
        assert_eq!(error.to_string(), "Cache connection failed: timeout");
    }

    #[test]
    fn test_retrieval_failed_display() {
        let error = CacheError::RetrievalFailed {
            key: "p1".to_string(),
            cause: "db down".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to retrieve value for key 'p1': db down"
        );
    }

    #[test]
    fn test_circuit_open_display() {
        let error = CacheError::CircuitOpen {
            breaker: "cacheL2".to_string(),
        };
        assert_eq!(error.to_string(), "Circuit breaker 'cacheL2' is open");
    }

    #[test]
    fn test_timeout_display() {
        let error = CacheError::Timeout {
            store: "price".to_string(),
            operation: "get".to_string(),
        };
        assert_eq!(error.to_string(), "Store 'price' timed out during get");
    }

    #[test]
    fn test_is_unavailable() {
        assert!(CacheError::ConnectionFailed("refused".into()).is_unavailable());
        assert!(CacheError::CircuitOpen {
            breaker: "cacheL2".into()
        }
        .is_unavailable());
        assert!(!CacheError::OperationFailed("WRONGTYPE".into()).is_unavailable());
        assert!(!CacheError::Serialization("eof".into()).is_unavailable());
    }
}
