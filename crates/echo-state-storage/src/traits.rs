//! StorageAdapter trait: the abstract interface for persisting one store's state.
//!
//! Every adapter is bound to a single record (a key, optionally inside a
//! database and collection). The store engine never sees which backend it
//! talks to beyond [`BackendKind`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

/// The physical backend behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Process memory, nothing survives a restart.
    Memory,
    /// Synchronous whole-value-per-key files.
    FlatKv,
    /// Asynchronous embedded SQLite database with collections.
    Transactional,
}

impl BackendKind {
    /// Whether values written through this backend survive a restart.
    pub fn is_durable(&self) -> bool {
        !matches!(self, BackendKind::Memory)
    }
}

/// The StorageAdapter trait: async interface over one persisted record.
///
/// # Contract
///
/// - `init` is idempotent. Every other operation initializes lazily, so
///   callers never have to await `init` first.
/// - A record that fails to decode is reported as absent (`Ok(None)`), never
///   as an error. A corrupt record must not block store construction.
/// - `close` releases the connection and keeps the data. Any later operation
///   reopens it.
/// - `destroy` removes the record and releases the connection.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Which backend this adapter talks to.
    fn kind(&self) -> BackendKind;

    /// The record key this adapter is bound to.
    fn key(&self) -> &str;

    /// Open the underlying connection if it is not open yet.
    async fn init(&self) -> Result<()>;

    /// Read the record.
    async fn get(&self) -> Result<Option<Value>>;

    /// Overwrite the record with `value`.
    async fn set(&self, value: &Value) -> Result<()>;

    /// Remove the record. Removing an absent record is not an error.
    async fn remove(&self) -> Result<()>;

    /// Release the connection, keeping the data.
    async fn close(&self);

    /// Remove the record and release the connection.
    async fn destroy(&self) -> Result<()>;
}

/// Extension trait for typed reads.
#[async_trait]
pub trait StorageAdapterExt: StorageAdapter {
    /// Read the record and decode it into `T`.
    ///
    /// A record that does not decode into `T` is treated as absent.
    async fn get_as<T: DeserializeOwned + Send>(&self) -> Result<Option<T>> {
        let Some(value) = self.get().await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                tracing::warn!(key = self.key(), error = %e, "stored record has unexpected shape, ignoring");
                Ok(None)
            }
        }
    }
}

impl<S: StorageAdapter + ?Sized> StorageAdapterExt for S {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_durability() {
        assert!(!BackendKind::Memory.is_durable());
        assert!(BackendKind::FlatKv.is_durable());
        assert!(BackendKind::Transactional.is_durable());
    }
}
