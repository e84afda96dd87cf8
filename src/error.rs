//! Error types for schemaledger.

use thiserror::Error;

/// The main error type for migration operations.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The ledger table could not be created or read.
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// Storage error outside of a single migration's transaction.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Migration definitions could not be listed.
    #[error("Source error: {0}")]
    Source(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operator supplied a missing or malformed argument.
    #[error("Usage error: {0}")]
    Usage(String),

    /// A name that cannot be used as a SQL identifier.
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Whether the operator (rather than the environment) is at fault.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// Errors raised by a [`Storage`](crate::store::Storage) implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not reach the database.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement failed to execute.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Transaction control (BEGIN/COMMIT/ROLLBACK) failed.
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                StorageError::Connection(e.to_string())
            }
            other => StorageError::Execution(other.to_string()),
        }
    }
}

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::LedgerUnavailable("relation does not exist".into());
        assert_eq!(
            err.to_string(),
            "Ledger unavailable: relation does not exist"
        );

        let err: MigrateError = StorageError::Execution("syntax error".into()).into();
        assert_eq!(err.to_string(), "Storage error: Execution error: syntax error");
    }

    #[test]
    fn test_usage_classification() {
        assert!(MigrateError::usage("missing name").is_usage());
        assert!(!MigrateError::Config("bad toml".into()).is_usage());
    }
}
