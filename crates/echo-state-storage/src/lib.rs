//! # Echo State Storage
//!
//! Storage adapters for Echo state stores. Each adapter persists exactly one
//! record (one store's state) behind the [`StorageAdapter`] trait, so the
//! store engine never depends on a concrete backend.
//!
//! ## Backends
//!
//! - [`MemoryBackend`] - process memory, no persistence
//! - [`FlatKvBackend`] - synchronous, one JSON file per key, no transactions
//! - [`TransactionalBackend`] - asynchronous SQLite database with versioned
//!   schema, collections, and one transaction per write
//!
//! ## Usage
//!
//! ```rust,no_run
//! use echo_state_storage::{StorageAdapter, TransactionalBackend};
//! use serde_json::json;
//!
//! async fn example() {
//!     let backend = TransactionalBackend::new("/var/lib/app", "app", None, "settings");
//!
//!     // No explicit init needed: the connection opens on first use.
//!     backend.set(&json!({"theme": "dark"})).await.unwrap();
//!     let stored = backend.get().await.unwrap();
//!     assert_eq!(stored, Some(json!({"theme": "dark"})));
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Corrupt records read as absent**: a value that fails to decode is
//!   logged and returned as `None`
//! - **Lazy connections**: every operation opens the connection if needed
//! - **Close keeps data, destroy removes it**

pub mod error;
pub mod flat;
pub mod memory;
pub mod migration;
pub mod traits;
pub mod transactional;

pub use error::{Result, StorageError};
pub use flat::FlatKvBackend;
pub use memory::MemoryBackend;
pub use traits::{BackendKind, StorageAdapter, StorageAdapterExt};
pub use transactional::{TransactionalBackend, DEFAULT_COLLECTION};
