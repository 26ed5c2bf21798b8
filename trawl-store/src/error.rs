//! Store error types

use thiserror::Error;
use trawl_core::BatchError;

/// Errors raised by the persistent record stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

impl From<StoreError> for BatchError {
    fn from(err: StoreError) -> Self {
        BatchError::Storage(err.to_string())
    }
}
