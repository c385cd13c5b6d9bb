//! In-memory implementation of the StorageAdapter trait.
//!
//! Nothing survives the process. Useful as an injected backend in tests and
//! for stores that want the asynchronous code path without durability.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::traits::{BackendKind, StorageAdapter};

/// In-memory backend bound to a single key.
pub struct MemoryBackend {
    key: String,
    slot: Mutex<Option<Value>>,
}

impl MemoryBackend {
    /// Create an empty backend for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            slot: Mutex::new(None),
        }
    }

    /// Create a backend that already holds `value`.
    pub fn with_value(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            slot: Mutex::new(Some(value)),
        }
    }

    /// Peek at the stored value without going through the async interface.
    pub fn snapshot(&self) -> Option<Value> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StorageAdapter for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self) -> Result<Option<Value>> {
        Ok(self.snapshot())
    }

    async fn set(&self, value: &Value) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    async fn close(&self) {}

    async fn destroy(&self) -> Result<()> {
        self.remove().await
    }
}
