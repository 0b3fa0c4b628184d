//! Error types for Docket

use std::time::Duration;

use thiserror::Error;

/// Core error type for Docket operations
#[derive(Error, Debug)]
pub enum DocketError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Every connection stayed checked out for the whole acquire timeout.
    #[error("Connection pool exhausted: no connection became available within {timeout:?}")]
    PoolExhausted { timeout: Duration },

    #[error("Connection pool is closed")]
    PoolClosed,

    /// The outcome of the in-flight transaction is unknown. The connection has been
    /// (or is about to be) force-closed; restart the operation on a fresh connection.
    #[error("Transaction integrity error: {0}")]
    TransactionIntegrity(String),

    /// An inner scope failed and rolled back the whole transaction.
    #[error("Transaction was aborted by a failure in a nested scope")]
    TransactionAborted,

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Monitor error: {0}")]
    Monitor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocketError {
    /// Whether the caller should discard its work and restart on a fresh connection.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            DocketError::TransactionIntegrity(_) | DocketError::TransactionAborted
        )
    }

    /// Whether the error came from pool saturation rather than the store itself.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, DocketError::PoolExhausted { .. })
    }
}

/// Result type alias for Docket operations
pub type Result<T> = std::result::Result<T, DocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_message_includes_timeout() {
        let err = DocketError::PoolExhausted {
            timeout: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("250ms"));
        assert!(err.is_pool_exhausted());
        assert!(!err.is_integrity_failure());
    }

    #[test]
    fn test_integrity_classification() {
        assert!(DocketError::TransactionAborted.is_integrity_failure());
        assert!(DocketError::TransactionIntegrity("severed".into()).is_integrity_failure());
        assert!(!DocketError::Query("syntax".into()).is_integrity_failure());
    }
}
