//! Transactional SQLite backend.
//!
//! Models an embedded structured database with object stores: one SQLite
//! file per database name, collections registered in `object_stores`, one
//! row per key in `entries`. Every write runs in its own transaction.
//!
//! The connection is opened lazily by whichever operation runs first, so
//! callers may use the backend before `init` has completed. All blocking
//! SQLite work runs on `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::migration::{self, now_millis};
use crate::traits::{BackendKind, StorageAdapter};

/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "echo-state";

/// File extension of database files.
const DATABASE_EXTENSION: &str = "sqlite3";

/// How long a writer waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type SharedConnection = Arc<Mutex<Connection>>;

/// SQLite-backed adapter bound to `(database, collection, key)`.
pub struct TransactionalBackend {
    path: PathBuf,
    database: String,
    collection: String,
    key: String,
    /// Lazily opened connection; `None` until first use and after `close`.
    conn: tokio::sync::Mutex<Option<SharedConnection>>,
}

impl TransactionalBackend {
    /// Bind a backend to `key` in `collection` of the database `database`,
    /// stored under `data_dir`.
    ///
    /// Nothing touches the disk until the first operation.
    pub fn new(
        data_dir: impl AsRef<Path>,
        database: impl Into<String>,
        collection: Option<String>,
        key: impl Into<String>,
    ) -> Self {
        let database = database.into();
        let path = data_dir
            .as_ref()
            .join(format!("{}.{}", database, DATABASE_EXTENSION));
        Self {
            path,
            database,
            collection: collection.unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            key: key.into(),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    /// A backend for another key in the same database and collection.
    pub fn rebind(&self, key: impl Into<String>) -> Self {
        Self {
            path: self.path.clone(),
            database: self.database.clone(),
            collection: self.collection.clone(),
            key: key.into(),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    /// The database name.
    pub fn database_name(&self) -> &str {
        &self.database
    }

    /// The collection ("object store") name.
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// The record key.
    pub fn key_name(&self) -> &str {
        &self.key
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a connection is currently open.
    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Close the connection and delete the whole database file.
    ///
    /// Every collection and key in the database goes with it, including
    /// records owned by other stores.
    pub async fn delete_database(&self) -> Result<()> {
        self.close().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            for suffix in ["", "-wal", "-shm", "-journal"] {
                let mut file = path.clone().into_os_string();
                file.push(suffix);
                match std::fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::Io(e)),
                }
            }
            Ok(())
        })
        .await?
    }

    /// Get the open connection, opening and migrating it on first use.
    async fn connection(&self) -> Result<SharedConnection> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }

        let path = self.path.clone();
        let collection = self.collection.clone();
        let conn = tokio::task::spawn_blocking(move || open_database(&path, &collection)).await??;
        let conn = Arc::new(Mutex::new(conn));
        *slot = Some(Arc::clone(&conn));

        tracing::debug!(database = %self.database, collection = %self.collection, "database opened");
        Ok(conn)
    }

    /// Run a blocking operation on the connection.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection().await?;
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StorageError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await?
    }
}

/// Open the database file, migrate it and register `collection`.
fn open_database(path: &Path, collection: &str) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    migration::migrate(&mut conn)?;
    conn.execute(
        "INSERT OR IGNORE INTO object_stores (name, created_at) VALUES (?1, ?2)",
        params![collection, now_millis()],
    )?;
    Ok(conn)
}

fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(buf)
}

#[async_trait]
impl StorageAdapter for TransactionalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Transactional
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn init(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn get(&self) -> Result<Option<Value>> {
        let collection = self.collection.clone();
        let key = self.key.clone();

        let bytes: Option<Vec<u8>> = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let bytes = tx
                    .query_row(
                        "SELECT value FROM entries WHERE collection = ?1 AND key = ?2",
                        params![collection, key],
                        |row| row.get(0),
                    )
                    .optional()?;
                tx.commit()?;
                Ok(bytes)
            })
            .await?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };
        match ciborium::from_reader::<Value, _>(&bytes[..]) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    database = %self.database,
                    key = %self.key,
                    error = %e,
                    "corrupt record, treating as absent"
                );
                Ok(None)
            }
        }
    }

    async fn set(&self, value: &Value) -> Result<()> {
        let encoded = encode_value(value)?;
        let collection = self.collection.clone();
        let key = self.key.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO entries (collection, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![collection, key, encoded, now_millis()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove(&self) -> Result<()> {
        let collection = self.collection.clone();
        let key = self.key.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM entries WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        if self.conn.lock().await.take().is_some() {
            tracing::debug!(database = %self.database, key = %self.key, "database closed");
        }
    }

    async fn destroy(&self) -> Result<()> {
        let result = self.remove().await;
        self.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(dir: &Path, key: &str) -> TransactionalBackend {
        TransactionalBackend::new(dir, "app", None, key)
    }

    #[tokio::test]
    async fn test_lazy_open_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path(), "k");

        assert!(!store.is_open().await);
        assert_eq!(store.get().await.unwrap(), None);
        assert!(store.is_open().await);
        assert_eq!(store.collection_name(), DEFAULT_COLLECTION);
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path(), "session");

        store.set(&json!({"count": 1, "tags": ["a"]})).await.unwrap();
        assert_eq!(
            store.get().await.unwrap(),
            Some(json!({"count": 1, "tags": ["a"]}))
        );

        store.set(&json!({"count": 2})).await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(json!({"count": 2})));

        store.remove().await.unwrap();
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path(), "k");
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert!(store.is_open().await);
    }

    #[tokio::test]
    async fn test_close_keeps_data_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path(), "k");

        store.set(&json!("kept")).await.unwrap();
        store.close().await;
        assert!(!store.is_open().await);

        assert_eq!(store.get().await.unwrap(), Some(json!("kept")));
    }

    #[tokio::test]
    async fn test_destroy_only_removes_own_record() {
        let dir = tempfile::tempdir().unwrap();
        let a = backend(dir.path(), "a");
        let b = a.rebind("b");

        a.set(&json!(1)).await.unwrap();
        b.set(&json!(2)).await.unwrap();

        a.destroy().await.unwrap();
        assert!(!a.is_open().await);
        assert_eq!(a.get().await.unwrap(), None);
        assert_eq!(b.get().await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let left = TransactionalBackend::new(dir.path(), "app", Some("left".into()), "k");
        let right = TransactionalBackend::new(dir.path(), "app", Some("right".into()), "k");

        left.set(&json!("L")).await.unwrap();
        assert_eq!(right.get().await.unwrap(), None);
        right.set(&json!("R")).await.unwrap();
        assert_eq!(left.get().await.unwrap(), Some(json!("L")));
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path(), "k");
        store.init().await.unwrap();

        let conn = Connection::open(store.path()).unwrap();
        conn.execute(
            "INSERT INTO entries (collection, key, value, updated_at) VALUES (?1, 'k', ?2, 0)",
            params![DEFAULT_COLLECTION, vec![0xffu8, 0x00, 0x13]],
        )
        .unwrap();

        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = backend(dir.path(), "k");
        store.set(&json!(true)).await.unwrap();
        assert!(store.path().exists());

        store.delete_database().await.unwrap();
        assert!(!store.path().exists());

        // Reopens a fresh database on next use.
        assert_eq!(store.get().await.unwrap(), None);
    }
}
