//! Error types for Echo stores.

use echo_state_storage::StorageError;
use thiserror::Error;

/// Errors returned by store operations.
///
/// Hydration, persistence and channel failures are logged and recovered
/// inside the store; only the variants below ever reach a caller.
#[derive(Debug, Error)]
pub enum EchoError {
    /// Synchronous read of an asynchronous store before hydration finished.
    #[error("store is not initialized yet: await ready() or use get_async()")]
    NotReady,

    /// Operation not supported by the store's backend.
    #[error("adapter misuse: {0}")]
    AdapterMisuse(String),

    /// An asynchronous backend was requested outside a tokio runtime.
    #[error("no tokio runtime available for an asynchronous backend")]
    NoRuntime,

    /// Storage error surfaced by an explicit backend operation.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, EchoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_converts() {
        let err: EchoError = StorageError::Serialization("bad".into()).into();
        assert!(matches!(err, EchoError::Storage(_)));
        assert!(err.to_string().contains("bad"));
    }
}
