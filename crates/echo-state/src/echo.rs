//! The Echo context: the explicitly constructed entry point stores are
//! created from.
//!
//! One `Echo` stands for one process. Stores created from contexts sharing a
//! [`ChannelProvider`] sync with each other; stores created from contexts
//! sharing a data directory share persisted records.

use std::sync::Arc;

use echo_state_storage::{FlatKvBackend, StorageAdapter, TransactionalBackend};
use echo_state_sync::{BroadcastHub, ChannelProvider};
use tokio::runtime::Handle;

use crate::config::{EchoConfig, TransactionalConfig};
use crate::error::{EchoError, Result};
use crate::store::Store;
use crate::value::StateValue;

/// Process-wide context: configuration plus the broadcast channels.
#[derive(Clone)]
pub struct Echo {
    config: EchoConfig,
    channels: Arc<dyn ChannelProvider>,
}

impl Echo {
    /// Create a context with an explicit channel provider.
    pub fn new(config: EchoConfig, channels: Arc<dyn ChannelProvider>) -> Self {
        Self { config, channels }
    }

    /// Create a context on a broadcast hub.
    pub fn with_hub(config: EchoConfig, hub: Arc<BroadcastHub>) -> Self {
        Self::new(config, hub)
    }

    /// The context configuration.
    pub fn config(&self) -> &EchoConfig {
        &self.config
    }

    /// Start building a store holding `default` until told otherwise.
    pub fn store<T: StateValue>(&self, default: T) -> StoreBuilder<T> {
        StoreBuilder {
            default,
            config: self.config.clone(),
            channels: Arc::clone(&self.channels),
        }
    }
}

/// Chooses a store's backend.
pub struct StoreBuilder<T> {
    default: T,
    config: EchoConfig,
    channels: Arc<dyn ChannelProvider>,
}

impl<T: StateValue> StoreBuilder<T> {
    /// A store without persistence or sync, initialized immediately.
    pub fn memory_only(self) -> Store<T> {
        Store::detached(self.default, self.config, self.channels)
    }

    /// A store on the flat backend under key `name`.
    ///
    /// Hydrates synchronously, so the store is initialized on return. An
    /// empty name yields a memory-only store. Receiving changes from other
    /// instances needs a tokio runtime; without one the store still
    /// broadcasts its own changes.
    pub fn with_flat_backend(self, name: &str, sync: bool) -> Store<T> {
        let root = self.config.flat_dir();
        let store = self.memory_only();
        if !name.is_empty() {
            store.attach_flat(FlatKvBackend::new(root, name), sync);
        }
        store
    }

    /// A store on the transactional backend.
    ///
    /// Returns immediately; the store hydrates in the background. Must be
    /// called inside a tokio runtime.
    pub fn with_transactional_backend(self, config: TransactionalConfig) -> Result<Store<T>> {
        if config.name.is_empty() {
            return Ok(self.memory_only());
        }
        if config.database.is_empty() {
            return Err(EchoError::AdapterMisuse(
                "transactional backend needs a database name".to_string(),
            ));
        }

        let runtime = Handle::try_current().map_err(|_| EchoError::NoRuntime)?;
        let collection = config
            .collection
            .unwrap_or_else(|| self.config.default_collection.clone());
        let backend = Arc::new(TransactionalBackend::new(
            &self.config.data_dir,
            config.database,
            Some(collection),
            config.name,
        ));

        let store = self.memory_only();
        store.attach_async(backend.clone(), Some(backend), config.sync, &runtime);
        Ok(store)
    }

    /// A store on a caller-supplied asynchronous backend.
    ///
    /// The channel name derives from the adapter's key. `switch` and
    /// `discard` are not available on such stores.
    pub fn with_backend(self, adapter: Arc<dyn StorageAdapter>, sync: bool) -> Result<Store<T>> {
        let runtime = Handle::try_current().map_err(|_| EchoError::NoRuntime)?;
        let store = self.memory_only();
        store.attach_async(adapter, None, sync, &runtime);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SetOptions, StoreVariant};
    use echo_state_storage::BackendKind;
    use echo_state_sync::HubConfig;
    use serde_json::json;

    fn echo(dir: &std::path::Path) -> Echo {
        Echo::with_hub(
            EchoConfig::with_data_dir(dir),
            BroadcastHub::new(HubConfig::default()),
        )
    }

    #[test]
    fn test_memory_only_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = echo(dir.path()).store(json!({"a": 1})).memory_only();
        assert_eq!(store.variant(), StoreVariant::MemoryOnly);
        assert_eq!(store.get().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_flat_store_works_without_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = echo(dir.path()).store(json!({"a": 1})).with_flat_backend("prefs", false);

        assert_eq!(store.variant(), StoreVariant::Synchronous);
        assert_eq!(store.backend_kind(), Some(BackendKind::FlatKv));
        assert_eq!(store.key().as_deref(), Some("prefs"));
        store.set(json!({"b": 2}), SetOptions::default());

        let reopened = echo(dir.path()).store(json!({})).with_flat_backend("prefs", false);
        assert_eq!(reopened.get().unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_empty_flat_name_is_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = echo(dir.path()).store(json!(0)).with_flat_backend("", true);
        assert_eq!(store.variant(), StoreVariant::MemoryOnly);
        assert!(!store.is_synced());
    }

    #[test]
    fn test_async_backend_requires_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let result = echo(dir.path())
            .store(json!(0))
            .with_transactional_backend(TransactionalConfig::new("app", "k"));
        assert!(matches!(result, Err(EchoError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_transactional_introspection() {
        let dir = tempfile::tempdir().unwrap();
        let store = echo(dir.path())
            .store(json!(0))
            .with_transactional_backend(TransactionalConfig::new("app", "counter"))
            .unwrap();

        assert_eq!(store.variant(), StoreVariant::Asynchronous);
        assert_eq!(store.database_name().unwrap(), "app");
        assert_eq!(store.key_name().unwrap(), "counter");
        assert!(matches!(store.get(), Err(EchoError::NotReady)));

        assert_eq!(store.get_async().await, json!(0));
        assert!(store.is_initialized());
    }

    #[tokio::test]
    async fn test_missing_database_name() {
        let dir = tempfile::tempdir().unwrap();
        let result = echo(dir.path())
            .store(json!(0))
            .with_transactional_backend(TransactionalConfig::new("", "k"));
        assert!(matches!(result, Err(EchoError::AdapterMisuse(_))));
    }
}
