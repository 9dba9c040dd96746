//! Error types for the collector store.

use std::time::Duration;

use pulse_core::{MetricError, Retriable};
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to backing store: {0}")]
    Connect(String),

    #[error("migration failed: {0}")]
    Migrate(String),

    /// Connection loss, serialization failures, resource exhaustion.
    #[error("transient backing-store error: {0}")]
    Transient(String),

    /// Constraint violations and anything else not worth retrying.
    #[error("backing-store error: {0}")]
    Fatal(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("backing-store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backing store is not configured")]
    Unavailable,

    /// Input the store refuses to merge; nothing was applied.
    #[error("invalid metric: {0}")]
    Invalid(#[from] MetricError),

    #[error("snapshot file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Retriable for StoreError {
    fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if is_transient_sqlstate(&code) => StoreError::Transient(err.to_string()),
                _ => StoreError::Fatal(err.to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
            sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::Decode(_) => StoreError::SchemaMismatch(err.to_string()),
            sqlx::Error::Migrate(e) => StoreError::Migrate(e.to_string()),
            _ => StoreError::Fatal(err.to_string()),
        }
    }
}

/// Postgres SQLSTATE codes worth retrying: connection exceptions (08),
/// serialization failure and deadlock (40001, 40P01), insufficient
/// resources (53) and operator intervention such as admin shutdown (57P).
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("53")
        || code.starts_with("57P")
        || code == "40001"
        || code == "40P01"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_sqlstates() {
        assert!(is_transient_sqlstate("08006")); // connection_failure
        assert!(is_transient_sqlstate("08001"));
        assert!(is_transient_sqlstate("40001")); // serialization_failure
        assert!(is_transient_sqlstate("40P01")); // deadlock_detected
        assert!(is_transient_sqlstate("53300")); // too_many_connections
        assert!(is_transient_sqlstate("57P01")); // admin_shutdown
    }

    #[test]
    fn fatal_sqlstates() {
        assert!(!is_transient_sqlstate("23505")); // unique_violation
        assert!(!is_transient_sqlstate("23514")); // check_violation
        assert!(!is_transient_sqlstate("42P01")); // undefined_table
        assert!(!is_transient_sqlstate("22003")); // numeric_value_out_of_range
    }

    #[test]
    fn pool_and_io_errors_are_retriable() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_retriable());
        assert!(StoreError::from(sqlx::Error::PoolClosed).is_retriable());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(StoreError::from(sqlx::Error::Io(io)).is_retriable());
    }

    #[test]
    fn decode_errors_are_schema_mismatches() {
        let err = StoreError::from(sqlx::Error::ColumnNotFound("delta".into()));
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn timeouts_retry_but_unavailable_does_not() {
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_retriable());
        assert!(!StoreError::Unavailable.is_retriable());
        assert!(!StoreError::Fatal("constraint".into()).is_retriable());
    }

    #[test]
    fn invalid_input_is_not_retried() {
        let err = StoreError::from(MetricError::CounterOverflow("polls".into()));
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(!err.is_retriable());
    }
}
