//! Error types for pgrepeat

use thiserror::Error;

/// Result type alias for pgrepeat operations
pub type ProfResult<T> = Result<T, ProfError>;

/// Error types for profiling and storage operations
#[derive(Debug, Error)]
pub enum ProfError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A query was issued on a connection in `CursorMode::Forbid`
    #[error("Query forbidden on connection '{alias}': {sql}")]
    QueryForbidden { alias: String, sql: String },

    /// Recorder used out of order (e.g. stats generated twice)
    #[error("Invalid recorder state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Migration error
    #[cfg(feature = "migrate")]
    #[error("Migration error: {0}")]
    Migration(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl ProfError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error was produced by a connection in forbid mode
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::QueryForbidden { .. })
    }
}

impl From<serde_json::Error> for ProfError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for ProfError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(feature = "migrate")]
impl From<refinery::Error> for ProfError {
    fn from(err: refinery::Error) -> Self {
        Self::Migration(err.to_string())
    }
}
