//! Error types for stmtpool

use thiserror::Error;

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors returned by [`StatementPool`](crate::StatementPool)
#[derive(Debug, Error)]
pub enum PoolError {
    /// The connection failed to prepare the query; nothing was cached
    #[error("Failed to prepare statement: {0}")]
    Compile(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No usable statement is cached under the key
    #[error("Statement not found: {0}")]
    NotFound(String),
}

impl PoolError {
    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::NotFound(_))
    }
}
