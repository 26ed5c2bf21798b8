//! Error types for batch scraping

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors raised while creating, driving or persisting a batch job
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    /// Malformed input: no valid URLs, settings out of range, bad name
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The hidden tab could not be opened
    #[error("Failed to open tab: {0}")]
    TabCreation(String),

    /// The URL points at a page that cannot be scripted (browser-internal pages)
    #[error("URL cannot be scripted: {0}")]
    UnscriptableUrl(String),

    /// The page did not report load completion in time
    #[error("Page load timed out after {}ms", .0.as_millis())]
    LoadTimeout(Duration),

    /// The extraction capability returned an error or did not answer in time
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// A compare-and-swap precondition did not hold
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The persistent store failed to read or write
    #[error("Storage error: {0}")]
    Storage(String),

    /// No job with this id exists
    #[error("Batch job not found: {0}")]
    NotFound(Uuid),

    /// The task was aborted because its job was cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl BatchError {
    /// Create a conflict error describing the expected and actual state
    pub fn conflict(what: impl std::fmt::Display, expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        Self::Conflict(format!("{} expected {:?}, found {:?}", what, expected, actual))
    }

    /// Whether a task failing with this error goes back through the retry policy
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TabCreation(_) | Self::LoadTimeout(_) | Self::Extraction(_)
        )
    }

    /// Check if this error is a CAS conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Check if this error came from the persistent store
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
