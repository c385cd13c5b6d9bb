//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur on a sync channel.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A frame could not be encoded or decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error raised by a channel implementation.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The channel endpoint was closed.
    #[error("channel closed")]
    Closed,
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidMessage(err.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
