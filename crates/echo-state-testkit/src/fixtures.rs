//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: simulated processes sharing a
//! broadcast hub, a channel provider that records traffic, and a backend
//! whose failures and timing the test controls.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use echo_state::storage::{BackendKind, MemoryBackend, StorageAdapter, StorageError};
use echo_state::sync::{
    BroadcastHub, ChannelProvider, HubChannel, HubConfig, Inbox, SyncChannel, SyncMessage,
};
use echo_state::sync::{EndpointId, Result as SyncResult};
use echo_state::{Echo, EchoConfig, PersistConfig};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Install a test-friendly tracing subscriber. Safe to call many times.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Retry policy that keeps failing-backend tests fast.
pub fn fast_persist() -> PersistConfig {
    PersistConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(1),
    }
}

/// One simulated application process: its own data directory, a hub shared
/// with its siblings.
pub struct SimulatedProcess {
    pub echo: Echo,
    pub dir: TempDir,
    hub: Arc<BroadcastHub>,
}

impl SimulatedProcess {
    /// A process with a fresh data directory on `hub`.
    pub fn new(hub: &Arc<BroadcastHub>) -> Self {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {}", e));
        let echo = Echo::with_hub(config_for(dir.path()), Arc::clone(hub));
        Self {
            echo,
            dir,
            hub: Arc::clone(hub),
        }
    }

    /// A new context over the same data directory and hub, as after a
    /// restart of this process.
    pub fn restart(&self) -> Echo {
        Echo::with_hub(config_for(self.dir.path()), Arc::clone(&self.hub))
    }
}

fn config_for(dir: &Path) -> EchoConfig {
    EchoConfig {
        persist: fast_persist(),
        ..EchoConfig::with_data_dir(dir)
    }
}

/// `count` processes sharing one hub.
pub fn processes(count: usize) -> (Arc<BroadcastHub>, Vec<SimulatedProcess>) {
    let hub = BroadcastHub::new(HubConfig::default());
    let procs = (0..count).map(|_| SimulatedProcess::new(&hub)).collect();
    (hub, procs)
}

/// Wait until `check` passes, polling every few milliseconds.
///
/// Panics after `timeout`.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording channels
// ─────────────────────────────────────────────────────────────────────────────

type PostLog = Arc<Mutex<Vec<(String, SyncMessage)>>>;

/// A channel provider on a private hub that logs every post.
pub struct RecordingProvider {
    hub: Arc<BroadcastHub>,
    log: PostLog,
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hub: BroadcastHub::new(HubConfig::default()),
            log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Every message posted through this provider, with its channel name.
    pub fn posts(&self) -> Vec<(String, SyncMessage)> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of messages posted through this provider.
    pub fn post_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Deliver `message` on `name` as if another process posted it.
    pub fn inject(&self, name: &str, message: &SyncMessage) {
        let foreign = self.hub.open(name);
        if let Err(e) = foreign.post(message) {
            panic!("inject on {}: {}", name, e);
        }
    }

    /// Open an unrecorded endpoint on `name`, as another process would.
    pub fn peer(&self, name: &str) -> HubChannel {
        self.hub.open(name)
    }
}

impl ChannelProvider for RecordingProvider {
    fn open_channel(&self, name: &str) -> SyncResult<Arc<dyn SyncChannel>> {
        Ok(Arc::new(RecordingChannel {
            inner: self.hub.open(name),
            log: Arc::clone(&self.log),
        }))
    }
}

struct RecordingChannel {
    inner: HubChannel,
    log: PostLog,
}

impl SyncChannel for RecordingChannel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn endpoint_id(&self) -> EndpointId {
        self.inner.endpoint_id()
    }

    fn post(&self, message: &SyncMessage) -> SyncResult<()> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((self.inner.name().to_string(), message.clone()));
        self.inner.post(message)
    }

    fn subscribe(&self) -> SyncResult<Inbox> {
        self.inner.subscribe()
    }

    fn close(&self) {
        self.inner.close()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted backend
// ─────────────────────────────────────────────────────────────────────────────

/// An in-memory backend whose reads and writes fail or stall on command.
pub struct ScriptedBackend {
    inner: MemoryBackend,
    fail_reads: bool,
    panic_reads: bool,
    write_failures: AtomicU32,
    write_attempts: AtomicU32,
    read_gate: Option<Arc<Notify>>,
    writes: Mutex<VecDeque<Value>>,
}

impl ScriptedBackend {
    /// An empty, well-behaved backend for `key`.
    pub fn new(key: &str) -> Self {
        Self {
            inner: MemoryBackend::new(key),
            fail_reads: false,
            panic_reads: false,
            write_failures: AtomicU32::new(0),
            write_attempts: AtomicU32::new(0),
            read_gate: None,
            writes: Mutex::new(VecDeque::new()),
        }
    }

    /// Start with `value` stored.
    pub fn with_value(key: &str, value: Value) -> Self {
        Self {
            inner: MemoryBackend::with_value(key, value),
            ..Self::new(key)
        }
    }

    /// Every read fails.
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Every read panics.
    pub fn panicking_reads(mut self) -> Self {
        self.panic_reads = true;
        self
    }

    /// The next `count` write attempts fail.
    pub fn failing_writes(self, count: u32) -> Self {
        self.write_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Reads wait until the returned handle is notified.
    pub fn held_reads(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.read_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// The stored value.
    pub fn snapshot(&self) -> Option<Value> {
        self.inner.snapshot()
    }

    /// Number of write attempts, failed ones included.
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Successful writes in order; removals show up as `Value::Null`.
    pub fn writes(&self) -> Vec<Value> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn record(&self, value: Value) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(value);
    }

    fn attempt_write(&self) -> echo_state::storage::Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "scripted write failure",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn key(&self) -> &str {
        self.inner.key()
    }

    async fn init(&self) -> echo_state::storage::Result<()> {
        Ok(())
    }

    async fn get(&self) -> echo_state::storage::Result<Option<Value>> {
        if let Some(gate) = &self.read_gate {
            gate.notified().await;
        }
        if self.panic_reads {
            panic!("scripted read panic");
        }
        if self.fail_reads {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "scripted read failure",
            )));
        }
        self.inner.get().await
    }

    async fn set(&self, value: &Value) -> echo_state::storage::Result<()> {
        self.attempt_write()?;
        self.inner.set(value).await?;
        self.record(value.clone());
        Ok(())
    }

    async fn remove(&self) -> echo_state::storage::Result<()> {
        self.attempt_write()?;
        self.inner.remove().await?;
        self.record(Value::Null);
        Ok(())
    }

    async fn close(&self) {}

    async fn destroy(&self) -> echo_state::storage::Result<()> {
        self.inner.destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_provider_logs_posts() {
        let provider = RecordingProvider::new();
        let channel = provider.open_channel("echo-k").unwrap();
        let peer = provider.peer("echo-k");
        let mut inbox = peer.subscribe().unwrap();

        channel
            .post(&SyncMessage::StateUpdate { state: json!(1) })
            .unwrap();

        assert_eq!(provider.post_count(), 1);
        assert_eq!(provider.posts()[0].0, "echo-k");
        assert_eq!(
            inbox.recv().await,
            Some(SyncMessage::StateUpdate { state: json!(1) })
        );
    }

    #[tokio::test]
    async fn test_scripted_backend_failures() {
        let backend = ScriptedBackend::new("k").failing_writes(1);
        assert!(backend.set(&json!(1)).await.is_err());
        backend.set(&json!(2)).await.unwrap();

        assert_eq!(backend.write_attempts(), 2);
        assert_eq!(backend.writes(), vec![json!(2)]);
        assert_eq!(backend.snapshot(), Some(json!(2)));

        let reads = ScriptedBackend::new("k").failing_reads();
        assert!(reads.get().await.is_err());
    }

    #[tokio::test]
    async fn test_held_reads_wait_for_release() {
        let (backend, gate) = ScriptedBackend::with_value("k", json!("v")).held_reads();
        let backend = Arc::new(backend);

        let reader = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.get().await })
        };
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());

        gate.notify_one();
        assert_eq!(reader.await.unwrap().unwrap(), Some(json!("v")));
    }

    #[test]
    fn test_processes_have_separate_dirs() {
        let (_hub, procs) = processes(2);
        assert_ne!(procs[0].dir.path(), procs[1].dir.path());
        assert_eq!(procs[0].echo.config().persist.max_retries, 3);
    }
}
