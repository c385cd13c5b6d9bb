//! Configuration for the Echo context and its stores.

use std::path::PathBuf;
use std::time::Duration;

use echo_state_storage::DEFAULT_COLLECTION;
use echo_state_sync::DEFAULT_CHANNEL_PREFIX;

/// Configuration shared by every store created from one [`Echo`](crate::Echo).
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Directory holding flat records and transactional database files.
    pub data_dir: PathBuf,
    /// Collection used by transactional stores that do not name one.
    pub default_collection: String,
    /// Prefix of broadcast channel names.
    pub channel_prefix: String,
    /// Write-behind persistence settings.
    pub persist: PersistConfig,
}

impl EchoConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Directory of the flat key-value backend.
    pub fn flat_dir(&self) -> PathBuf {
        self.data_dir.join("flat")
    }
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("echo-data"),
            default_collection: DEFAULT_COLLECTION.to_string(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            persist: PersistConfig::default(),
        }
    }
}

/// Retry policy of the persistence worker.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Extra attempts after a failed write before it is dropped.
    pub max_retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Where a transactional store keeps its record.
#[derive(Debug, Clone)]
pub struct TransactionalConfig {
    /// Database name; one file per database under the data directory.
    pub database: String,
    /// Collection inside the database; `None` uses the context default.
    pub collection: Option<String>,
    /// Record key, also the broadcast channel suffix.
    pub name: String,
    /// Whether to broadcast and receive changes.
    pub sync: bool,
}

impl TransactionalConfig {
    /// Record `name` in `database`, default collection, sync off.
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: None,
            name: name.into(),
            sync: false,
        }
    }

    /// Use `collection` instead of the default one.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Turn cross-instance sync on or off.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}
