//! Store error types

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store-related errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Backend rejected or failed a command
    #[error("Store command failed: {0}")]
    CommandFailed(String),

    /// Positional access beyond the end of a list
    #[error("Index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A queued item could not be decoded. It has already been removed from
    /// the queue; `raw` is its original text.
    #[error("Malformed payload on queue {queue}: {message}")]
    MalformedPayload {
        queue: String,
        raw: String,
        message: String,
    },

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::ConnectionFailed(err.to_string())
        } else {
            StoreError::CommandFailed(err.to_string())
        }
    }
}
