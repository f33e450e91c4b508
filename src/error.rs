//! Error types for the Windgate service.

use thiserror::Error;

/// Main error type for Windgate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected input (non-positive limit or window, empty subject key).
    /// No state is touched when this is returned.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The decision backend could not be reached or failed mid-operation.
    /// Never a denial: callers apply their own fail-open/fail-closed policy.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Whether this error reports an unreachable or failing backend.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, GateError::BackendUnavailable(_))
    }
}

impl From<redis::RedisError> for GateError {
    fn from(err: redis::RedisError) -> Self {
        GateError::BackendUnavailable(err.to_string())
    }
}

/// Result type alias for Windgate operations.
pub type Result<T> = std::result::Result<T, GateError>;
