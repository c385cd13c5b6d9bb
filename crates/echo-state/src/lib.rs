//! # Echo State
//!
//! Reactive state stores that persist themselves and stay in step across
//! every instance of an application on one host.
//!
//! ## Overview
//!
//! A [`Store`] holds one value, notifies subscribers synchronously when it
//! changes and, depending on how it was built:
//!
//! - **Memory only**: nothing else
//! - **Flat backend**: reads and writes a JSON file synchronously
//! - **Transactional backend**: hydrates from SQLite in the background and
//!   writes behind, retrying failed writes
//!
//! With sync on, every change is broadcast on a channel named after the
//! store's key, and other instances apply it without echoing it back.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use echo_state::{Echo, EchoConfig, SetOptions, TransactionalConfig};
//! use echo_state::sync::{BroadcastHub, HubConfig};
//! use serde_json::json;
//!
//! # async fn example() -> echo_state::Result<()> {
//! let echo = Echo::with_hub(
//!     EchoConfig::with_data_dir("/var/lib/app"),
//!     BroadcastHub::new(HubConfig::default()),
//! );
//!
//! let settings = echo
//!     .store(json!({"theme": "light", "volume": 5}))
//!     .with_transactional_backend(TransactionalConfig::new("app", "settings").sync(true))?;
//!
//! settings.subscribe(|state| println!("settings changed: {}", state));
//! settings.ready(None, SetOptions::default()).await;
//!
//! settings.set(json!({"theme": "dark"}), SetOptions::default());
//! assert_eq!(settings.get()?, json!({"theme": "dark", "volume": 5}));
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! - `echo_state::storage` - storage adapters and backends
//! - `echo_state::sync` - broadcast channels and the wire format

pub mod config;
pub mod echo;
pub mod error;
pub mod hook;
mod persist;
pub mod store;
pub mod value;

// Re-export component crates
pub use echo_state_storage as storage;
pub use echo_state_sync as sync;

// Re-export main types for convenience
pub use config::{EchoConfig, PersistConfig, TransactionalConfig};
pub use echo::{Echo, StoreBuilder};
pub use error::{EchoError, Result};
pub use hook::{Selector, StateHook};
pub use store::{SetOptions, Store, StoreVariant, SubscriptionId, Update, Updater};
pub use value::{is_equal, StateKind, StateValue};
