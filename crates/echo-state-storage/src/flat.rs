//! Flat key-value file backend.
//!
//! Models a simple durable key-value file store: one JSON file per key under
//! a root directory, the whole value rewritten on every write, no
//! transactions. All operations are blocking and complete without awaiting,
//! which is what lets the synchronous store variant use it directly.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::traits::{BackendKind, StorageAdapter};

/// File extension of stored records.
const RECORD_EXTENSION: &str = "json";

/// Distinguishes temp files of concurrent writers within one process.
static TEMP_NONCE: AtomicU64 = AtomicU64::new(0);

/// Flat file backend bound to a single key.
#[derive(Debug, Clone)]
pub struct FlatKvBackend {
    root: PathBuf,
    key: String,
    path: PathBuf,
}

impl FlatKvBackend {
    /// Bind a backend to `key` under `root`.
    ///
    /// Nothing touches the disk until the first operation.
    pub fn new(root: impl AsRef<Path>, key: impl Into<String>) -> Self {
        let root = root.as_ref().to_path_buf();
        let key = key.into();
        let path = root.join(format!("{}.{}", escape_key(&key), RECORD_EXTENSION));
        Self { root, key, path }
    }

    /// The file holding this key's record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory holding all records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the record.
    ///
    /// A missing file is an absent record. A file that is not valid JSON is
    /// logged and also reported as absent.
    pub fn get_blocking(&self) -> Result<Option<Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "corrupt flat record, treating as absent");
                Ok(None)
            }
        }
    }

    /// Overwrite the record.
    ///
    /// The new value is written to a sibling temp file and renamed over the
    /// record, so readers never observe a half-written value.
    pub fn set_blocking(&self, value: &Value) -> Result<()> {
        let text =
            serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;

        fs::create_dir_all(&self.root)?;
        let tmp = self.root.join(format!(
            ".{}.{}.{}.tmp",
            escape_key(&self.key),
            std::process::id(),
            TEMP_NONCE.fetch_add(1, Ordering::Relaxed)
        ));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&text)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Remove the record. A missing record is not an error.
    pub fn remove_blocking(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StorageAdapter for FlatKvBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FlatKv
    }

    fn key(&self) -> &str {
        &self.key
    }

    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    async fn get(&self) -> Result<Option<Value>> {
        self.get_blocking()
    }

    async fn set(&self, value: &Value) -> Result<()> {
        self.set_blocking(value)
    }

    async fn remove(&self) -> Result<()> {
        self.remove_blocking()
    }

    async fn close(&self) {}

    async fn destroy(&self) -> Result<()> {
        self.remove_blocking()
    }
}

/// Map an arbitrary key to a portable file name.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. The mapping is injective, so distinct keys never share a file.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("settings"), "settings");
        assert_eq!(escape_key("user-prefs_2"), "user-prefs_2");
        assert_eq!(escape_key("a/b"), "a%2Fb");
        assert_eq!(escape_key("a.b"), "a%2Eb");
        assert_ne!(escape_key("a%2Fb"), escape_key("a/b"));
        assert_eq!(escape_key(""), "%");
    }

    #[test]
    fn test_flat_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FlatKvBackend::new(dir.path(), "window/layout");

        assert_eq!(backend.get_blocking().unwrap(), None);

        backend.set_blocking(&json!({"width": 800})).unwrap();
        assert_eq!(backend.get_blocking().unwrap(), Some(json!({"width": 800})));

        backend.set_blocking(&json!({"width": 1024})).unwrap();
        assert_eq!(backend.get_blocking().unwrap(), Some(json!({"width": 1024})));

        backend.remove_blocking().unwrap();
        assert_eq!(backend.get_blocking().unwrap(), None);
        // Removing twice is fine.
        backend.remove_blocking().unwrap();
    }

    #[test]
    fn test_flat_corrupt_record_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FlatKvBackend::new(dir.path(), "broken");
        fs::write(backend.path(), b"{not json").unwrap();

        assert_eq!(backend.get_blocking().unwrap(), None);
    }

    #[test]
    fn test_flat_keys_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = FlatKvBackend::new(dir.path(), "a");
        let b = FlatKvBackend::new(dir.path(), "b");

        a.set_blocking(&json!("alpha")).unwrap();
        b.set_blocking(&json!("beta")).unwrap();
        a.remove_blocking().unwrap();

        assert_eq!(a.get_blocking().unwrap(), None);
        assert_eq!(b.get_blocking().unwrap(), Some(json!("beta")));
    }

    #[test]
    fn test_flat_concurrent_writers_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let writers: Vec<_> = (0..4)
            .map(|n| {
                let backend = FlatKvBackend::new(dir.path(), "shared");
                std::thread::spawn(move || {
                    for i in 0..50 {
                        backend.set_blocking(&json!({"writer": n, "i": i})).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let stored = FlatKvBackend::new(dir.path(), "shared").get_blocking().unwrap().unwrap();
        assert_eq!(stored["i"], json!(49));
        // No temp files are left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_flat_async_interface() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FlatKvBackend::new(dir.path().join("nested"), "k");

        backend.init().await.unwrap();
        backend.set(&json!([1, 2, 3])).await.unwrap();
        assert_eq!(backend.get().await.unwrap(), Some(json!([1, 2, 3])));

        backend.destroy().await.unwrap();
        assert_eq!(backend.get().await.unwrap(), None);
        assert_eq!(backend.kind(), BackendKind::FlatKv);
    }
}
