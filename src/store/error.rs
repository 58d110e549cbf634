//! Store error types
//!
//! Persistence failures never reach a client: the writer logs them and moves
//! on. `is_retryable` drives the optional insert retry and marks errors
//! after which a pooled connection must not be reused.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Statement or insert failed
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    /// Collection name is not a plain identifier
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    /// Document could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation exceeded its time bound
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Connection(_) | StoreError::Timeout(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code().map_or(false, |code| is_connection_sqlstate(&code))
            },
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

/// Connection exceptions (class 08) and operator intervention (57P), such
/// as a backend terminated by an administrator or a server shutdown
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("57P")
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<StoreError> for crate::error::Error {
    fn from(err: StoreError) -> Self {
        crate::error::Error::store(err.to_string())
    }
}
