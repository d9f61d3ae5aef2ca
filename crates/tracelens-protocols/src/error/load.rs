//! Trace loading errors.

use std::time::Duration;

use thiserror::Error;

/// Archive-level failures. These are the only hard failures surfaced to callers.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Archive path does not exist.
    #[error("Trace archive not found: {0}")]
    NotFound(String),

    /// Manifest unreadable or a stream out of order.
    #[error("Malformed trace archive: {0}")]
    MalformedArchive(String),

    /// The trace holds no actions.
    #[error("Trace contains no action events")]
    EmptyTrace,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Loading exceeded the caller's deadline.
    #[error("Loading timed out after {0:?}")]
    Timeout(Duration),

    /// Loading was cancelled by the caller.
    #[error("Loading cancelled")]
    Cancelled,
}

impl LoadError {
    /// Shorthand for a malformed-archive error.
    pub fn malformed(message: impl Into<String>) -> Self {
        LoadError::MalformedArchive(message.into())
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::MalformedArchive(format!("invalid JSON: {}", err))
    }
}
