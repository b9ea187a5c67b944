//! Error types for pool and provider operations.

use thiserror::Error;

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by the pool, connections, and the provider factory.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The underlying SQLite driver failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection handle was misused (e.g. already closed).
    #[error("Connection error: {0}")]
    Connection(String),

    /// A query produced an unexpected shape of result.
    #[error("Query error: {0}")]
    Query(String),

    /// A checkout waited too long for a free slot.
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Invariant violation inside the pool itself.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PoolError::config("no provider configured");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("no provider configured"));
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(PoolError::config("x"), PoolError::Config(_)));
        assert!(matches!(
            PoolError::connection("x"),
            PoolError::Connection(_)
        ));
        assert!(matches!(PoolError::timeout("x"), PoolError::Timeout(_)));
        assert!(matches!(PoolError::internal("x"), PoolError::Internal(_)));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let err: PoolError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, PoolError::Sqlite(_)));
    }
}
