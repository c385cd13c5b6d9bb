//! Write-behind persistence for asynchronous backends.
//!
//! Each store attached to an asynchronous backend owns one worker task fed
//! by an unbounded queue. The queue carries whole values, so writes land in
//! commit order and the last one wins. Failed writes are retried per
//! [`PersistConfig`] and then dropped; the in-memory state is never rolled
//! back.

use std::sync::Arc;

use echo_state_storage::StorageAdapter;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::PersistConfig;

enum PersistOp {
    /// Overwrite the record. `Value::Null` removes it.
    Write(Value),
    /// Signal once everything queued before this op has landed.
    Flush(oneshot::Sender<()>),
    /// Remove the record for good and stop.
    Destroy,
}

/// Handle to a running persistence worker.
pub(crate) struct PersistWriter {
    key: String,
    tx: mpsc::UnboundedSender<PersistOp>,
    task: JoinHandle<()>,
}

impl PersistWriter {
    /// Start a worker for `adapter` on `runtime`.
    pub(crate) fn spawn(
        adapter: Arc<dyn StorageAdapter>,
        config: PersistConfig,
        runtime: &Handle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = adapter.key().to_string();
        let task = runtime.spawn(run(adapter, config, rx));
        Self { key, tx, task }
    }

    /// Queue a write of `value`.
    pub(crate) fn write(&self, value: Value) {
        self.send(PersistOp::Write(value));
    }

    /// Queue a flush marker. The receiver resolves once every write queued
    /// before it has completed or been dropped.
    pub(crate) fn flush(&self) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        self.send(PersistOp::Flush(done));
        rx
    }

    /// Stop accepting writes. Queued writes still land, then the backend is
    /// closed and the returned task ends.
    pub(crate) fn close(self) -> JoinHandle<()> {
        self.task
    }

    /// Like [`close`](Self::close), but remove the record once the queue
    /// has drained.
    pub(crate) fn destroy(self) -> JoinHandle<()> {
        self.send(PersistOp::Destroy);
        self.task
    }

    fn send(&self, op: PersistOp) {
        if self.tx.send(op).is_err() {
            tracing::warn!(key = %self.key, "persistence worker is gone, dropping write");
        }
    }
}

async fn run(
    adapter: Arc<dyn StorageAdapter>,
    config: PersistConfig,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
) {
    let mut destroy = false;

    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Write(value) => write_with_retry(adapter.as_ref(), &config, &value).await,
            PersistOp::Flush(done) => {
                let _ = done.send(());
            }
            PersistOp::Destroy => {
                destroy = true;
                break;
            }
        }
    }

    if destroy {
        match adapter.destroy().await {
            Ok(()) => tracing::debug!(key = adapter.key(), "persisted state destroyed"),
            Err(e) => {
                tracing::error!(key = adapter.key(), error = %e, "failed to destroy persisted state")
            }
        }
    } else {
        adapter.close().await;
    }
}

async fn write_with_retry(adapter: &dyn StorageAdapter, config: &PersistConfig, value: &Value) {
    let mut failures = 0u32;
    loop {
        let result = if value.is_null() {
            adapter.remove().await
        } else {
            adapter.set(value).await
        };

        match result {
            Ok(()) => return,
            Err(e) if failures < config.max_retries => {
                failures += 1;
                tracing::warn!(
                    key = adapter.key(),
                    attempt = failures,
                    error = %e,
                    "failed to persist state, retrying"
                );
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) => {
                tracing::error!(
                    key = adapter.key(),
                    error = %e,
                    "failed to persist state, giving up"
                );
                return;
            }
        }
    }
}
