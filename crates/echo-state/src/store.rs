//! The store engine.
//!
//! A [`Store`] holds one state value, notifies subscribers synchronously on
//! every change, optionally persists the value through a backend and
//! optionally mirrors changes to other instances of the same key over a
//! broadcast channel.
//!
//! Every update runs the same pipeline: resolve the update, merge or replace,
//! drop it if structurally equal to the current state, commit, persist,
//! broadcast, notify. Persistence and broadcast are skipped while hydrating
//! and broadcast is skipped for changes received from other instances.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use echo_state_storage::{
    BackendKind, FlatKvBackend, Result as StorageResult, StorageAdapter, StorageError,
    TransactionalBackend,
};
use echo_state_sync::{channel_name, ChannelProvider, Inbox, SyncChannel, SyncMessage};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EchoConfig;
use crate::error::{EchoError, Result};
use crate::persist::PersistWriter;
use crate::value::{StateKind, StateValue};

/// Token returned by [`Store::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Computes an update from the current state.
pub type Updater<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// A new value, or a function of the current value.
pub enum Update<T> {
    /// Use this value as the partial (or full, with `replace`) update.
    Value(T),
    /// Compute the update from the current state.
    ///
    /// An updater applied while the store is hydrating runs twice: once on
    /// the in-memory state, and again on the hydrated state.
    With(Updater<T>),
}

impl<T> Update<T> {
    /// Wrap an updater function.
    pub fn with(f: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        Update::With(Arc::new(f))
    }
}

impl<T> From<T> for Update<T> {
    fn from(value: T) -> Self {
        Update::Value(value)
    }
}

/// Options for [`Store::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Replace the state instead of shallow-merging into a mapping.
    pub replace: bool,
    /// The update came from another instance: do not broadcast it again.
    pub from_sync: bool,
}

impl SetOptions {
    /// Replace instead of merge.
    pub fn replace() -> Self {
        Self {
            replace: true,
            from_sync: false,
        }
    }
}

/// How a store persists its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreVariant {
    /// No backend.
    MemoryOnly,
    /// Flat backend, read and written synchronously.
    Synchronous,
    /// Asynchronous backend with hydration and write-behind persistence.
    Asynchronous,
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum Change<T> {
    Set { partial: T, replace: bool },
    With { f: Updater<T>, replace: bool },
    Delete(String),
}

/// An update recorded while hydration was in flight.
struct PendingChange<T> {
    change: Change<T>,
    from_sync: bool,
}

enum Backend {
    None,
    Flat(FlatKvBackend),
    Async {
        adapter: Arc<dyn StorageAdapter>,
        transactional: Option<Arc<TransactionalBackend>>,
        writer: PersistWriter,
    },
}

impl Backend {
    fn key(&self) -> Option<&str> {
        match self {
            Backend::None => None,
            Backend::Flat(flat) => Some(flat.key()),
            Backend::Async { adapter, .. } => Some(adapter.key()),
        }
    }
}

/// One store's attachment to a broadcast channel.
struct Endpoint {
    channel: Arc<dyn SyncChannel>,
    receiver: Option<JoinHandle<()>>,
}

impl Endpoint {
    fn close(self) {
        if let Some(task) = self.receiver {
            task.abort();
        }
        self.channel.close();
    }
}

struct Core<T> {
    state: T,
    listeners: BTreeMap<SubscriptionId, Listener<T>>,
    next_subscription: u64,
    backend: Backend,
    channel: Option<Endpoint>,
    initialized: bool,
    hydrating: bool,
    /// Bumped whenever the store is re-pointed; stale hydrations compare
    /// against it and bail out.
    generation: u64,
    pending: Vec<PendingChange<T>>,
    /// Workers of backends this store has let go of, still draining.
    retired: Vec<JoinHandle<()>>,
}

impl<T: StateValue> Core<T> {
    fn label(&self) -> &str {
        self.backend.key().unwrap_or("<memory>")
    }

    fn listeners(&self) -> Vec<Listener<T>> {
        self.listeners.values().cloned().collect()
    }

    fn encode(&self) -> Option<Value> {
        match serde_json::to_value(&self.state) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key = self.label(), error = %e, "failed to encode state");
                None
            }
        }
    }

    /// Hand `encoded` to the backend. `Value::Null` removes the record.
    fn write_through(&self, encoded: &Value) {
        match &self.backend {
            Backend::None => {}
            Backend::Flat(flat) => {
                let result = if encoded.is_null() {
                    flat.remove_blocking()
                } else {
                    flat.set_blocking(encoded)
                };
                if let Err(e) = result {
                    tracing::error!(key = flat.key(), error = %e, "failed to persist state");
                }
            }
            Backend::Async { writer, .. } => writer.write(encoded.clone()),
        }
    }

    fn persist_current(&self) {
        if self.hydrating {
            return;
        }
        if let Some(encoded) = self.encode() {
            self.write_through(&encoded);
        }
    }

    fn broadcast(&self, message: &SyncMessage) {
        if let Some(endpoint) = &self.channel {
            if let Err(e) = endpoint.channel.post(message) {
                tracing::warn!(
                    channel = endpoint.channel.name(),
                    error = %e,
                    "failed to broadcast state change"
                );
            }
        }
    }

    fn close_channel(&mut self) {
        if let Some(endpoint) = self.channel.take() {
            endpoint.close();
        }
    }

    /// Let go of the backend. Queued writes of an asynchronous backend still
    /// land before it closes.
    fn retire_backend(&mut self) -> Option<Arc<dyn StorageAdapter>> {
        self.retired.retain(|task| !task.is_finished());
        match std::mem::replace(&mut self.backend, Backend::None) {
            Backend::Async { adapter, writer, .. } => {
                self.retired.push(writer.close());
                Some(adapter)
            }
            Backend::Flat(_) | Backend::None => None,
        }
    }

    /// Mark initialized and drop any hydration in flight.
    fn settle(&mut self) {
        self.generation += 1;
        self.hydrating = false;
        self.initialized = true;
        self.pending.clear();
    }
}

/// Compute the state after `change`, or `None` when it is a no-op.
fn next_state<T: StateValue>(current: &T, change: &Change<T>) -> Option<T> {
    match change {
        Change::Set { partial, replace } => Some(combine(current, partial.clone(), *replace)),
        Change::With { f, replace } => Some(combine(current, f(current), *replace)),
        Change::Delete(key) => current.without_key(key),
    }
}

fn combine<T: StateValue>(current: &T, partial: T, replace: bool) -> T {
    if replace || current.kind() != StateKind::Mapping {
        partial
    } else {
        current.merge(partial)
    }
}

fn notify<T>(listeners: &[Listener<T>], state: &T) {
    for listener in listeners {
        listener(state);
    }
}

struct Inner<T: StateValue> {
    default: T,
    config: EchoConfig,
    channels: Arc<dyn ChannelProvider>,
    ready: watch::Sender<bool>,
    core: Mutex<Core<T>>,
}

impl<T: StateValue> Drop for Inner<T> {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        core.close_channel();
    }
}

/// A reactive state container.
///
/// `Store` is a cheap handle: clones share the same state, subscribers and
/// backend. Listeners run synchronously on the thread that made the change,
/// after the store's lock is released, so they may call back into the store.
pub struct Store<T: StateValue> {
    inner: Arc<Inner<T>>,
}

impl<T: StateValue> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: StateValue> Store<T> {
    /// A memory-only, initialized store.
    pub(crate) fn detached(
        default: T,
        config: EchoConfig,
        channels: Arc<dyn ChannelProvider>,
    ) -> Self {
        let (ready, _) = watch::channel(true);
        let core = Core {
            state: default.clone(),
            listeners: BTreeMap::new(),
            next_subscription: 0,
            backend: Backend::None,
            channel: None,
            initialized: true,
            hydrating: false,
            generation: 0,
            pending: Vec::new(),
            retired: Vec::new(),
        };
        Self {
            inner: Arc::new(Inner {
                default,
                config,
                channels,
                ready,
                core: Mutex::new(core),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core<T>> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// The current state.
    ///
    /// Fails with [`EchoError::NotReady`] on an asynchronous store whose
    /// hydration has not finished.
    pub fn get(&self) -> Result<T> {
        let core = self.lock();
        if !core.initialized {
            return Err(EchoError::NotReady);
        }
        Ok(core.state.clone())
    }

    /// The current state, waiting for hydration first.
    pub async fn get_async(&self) -> T {
        self.wait_ready().await;
        self.lock().state.clone()
    }

    /// The in-memory state, initialized or not.
    pub fn snapshot(&self) -> T {
        self.lock().state.clone()
    }

    /// The value the store was created with.
    pub fn default_value(&self) -> &T {
        &self.inner.default
    }

    /// Whether hydration has finished.
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// How this store persists.
    pub fn variant(&self) -> StoreVariant {
        match &self.lock().backend {
            Backend::None => StoreVariant::MemoryOnly,
            Backend::Flat(_) => StoreVariant::Synchronous,
            Backend::Async { .. } => StoreVariant::Asynchronous,
        }
    }

    /// The backend in use, if any.
    pub fn backend_kind(&self) -> Option<BackendKind> {
        match &self.lock().backend {
            Backend::None => None,
            Backend::Flat(flat) => Some(flat.kind()),
            Backend::Async { adapter, .. } => Some(adapter.kind()),
        }
    }

    /// The record key, if the store has a backend.
    pub fn key(&self) -> Option<String> {
        self.lock().backend.key().map(str::to_string)
    }

    /// Whether the store is attached to a broadcast channel.
    pub fn is_synced(&self) -> bool {
        self.lock().channel.is_some()
    }

    /// Database name of a transactional store.
    pub fn database_name(&self) -> Result<String> {
        self.with_transactional(|backend| backend.database_name().to_string())
    }

    /// Record key of a transactional store.
    pub fn key_name(&self) -> Result<String> {
        self.with_transactional(|backend| backend.key_name().to_string())
    }

    fn with_transactional<R>(&self, f: impl FnOnce(&TransactionalBackend) -> R) -> Result<R> {
        match &self.lock().backend {
            Backend::Async {
                transactional: Some(backend),
                ..
            } => Ok(f(backend)),
            _ => Err(EchoError::AdapterMisuse(
                "store has no transactional backend".to_string(),
            )),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Updates
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply an update.
    ///
    /// Mapping state is shallow-merged with the update unless
    /// `options.replace` is set; every other shape is replaced. Structurally
    /// equal results are dropped without notifying anyone.
    pub fn set(&self, update: impl Into<Update<T>>, options: SetOptions) {
        let change = match update.into() {
            Update::Value(partial) => Change::Set {
                partial,
                replace: options.replace,
            },
            Update::With(f) => Change::With {
                f,
                replace: options.replace,
            },
        };
        self.apply(change, options.from_sync);
    }

    /// Delete `key`.
    ///
    /// Mapping state loses the key, string state becomes `""`, number state
    /// becomes `-1`, sequence state loses the element at index `key`. Null
    /// and boolean state are left alone.
    pub fn delete(&self, key: &str) {
        self.apply(Change::Delete(key.to_string()), false);
    }

    /// Replace the state with the default.
    pub fn reset(&self) {
        self.set(self.inner.default.clone(), SetOptions::replace());
    }

    /// Run the update pipeline. Returns whether the state changed.
    fn apply(&self, change: Change<T>, from_sync: bool) -> bool {
        // Updaters run outside the lock so they may read the store. While
        // hydrating, the updater itself is recorded for replay.
        let (change, recorded) = match change {
            Change::With { f, replace } => {
                let partial = f(&self.snapshot());
                (Change::Set { partial, replace }, Some(Change::With { f, replace }))
            }
            other => (other, None),
        };

        let (listeners, state) = {
            let mut core = self.lock();
            let next = next_state(&core.state, &change);

            let delete_key = match &change {
                Change::Delete(key) => Some(key.clone()),
                Change::Set { .. } | Change::With { .. } => None,
            };
            if core.hydrating {
                let change = recorded.unwrap_or(change);
                core.pending.push(PendingChange { change, from_sync });
            }

            let Some(next) = next else {
                return false;
            };
            if next.is_equal(&core.state) {
                return false;
            }
            core.state = next;

            if !core.hydrating {
                if let Some(encoded) = core.encode() {
                    core.write_through(&encoded);
                    if !from_sync {
                        let message = match delete_key {
                            Some(key) => SyncMessage::StateDelete { key },
                            None => SyncMessage::StateUpdate { state: encoded },
                        };
                        core.broadcast(&message);
                    }
                }
            }

            (core.listeners(), core.state.clone())
        };

        notify(&listeners, &state);
        true
    }

    /// Apply a message from another instance, then persist locally.
    fn apply_remote(&self, message: SyncMessage) {
        let change = match message {
            SyncMessage::StateUpdate { state } => match serde_json::from_value::<T>(state) {
                Ok(partial) => Change::Set {
                    partial,
                    replace: true,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "dropping sync update with unexpected shape");
                    return;
                }
            },
            SyncMessage::StateDelete { key } => Change::Delete(key),
        };

        if !self.apply(change, true) {
            // Unchanged in memory; the backend may still lag behind.
            self.lock().persist_current();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a listener called with the new state after every change.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let mut core = self.lock();
        let id = SubscriptionId(core.next_subscription);
        core.next_subscription += 1;
        core.listeners.insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().listeners.remove(&id).is_some()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Readiness
    // ─────────────────────────────────────────────────────────────────────────

    async fn wait_ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        let _ = ready.wait_for(|initialized| *initialized).await;
    }

    /// Wait for hydration, then apply `seed` if given.
    pub async fn ready(&self, seed: Option<Update<T>>, options: SetOptions) {
        self.wait_ready().await;
        if let Some(seed) = seed {
            self.set(seed, options);
        }
    }

    /// Wait until every write queued so far has reached the backend,
    /// including writes of backends the store has since let go of.
    pub async fn flush(&self) {
        self.wait_ready().await;
        let (marker, retired) = {
            let mut core = self.lock();
            let marker = match &core.backend {
                Backend::Async { writer, .. } => Some(writer.flush()),
                Backend::Flat(_) | Backend::None => None,
            };
            (marker, std::mem::take(&mut core.retired))
        };

        for task in retired {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "persistence worker ended abnormally");
            }
        }
        if let Some(marker) = marker {
            let _ = marker.await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attachment
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach a flat backend, hydrating synchronously.
    ///
    /// A stored value is merged into the default, so mapping defaults gain
    /// keys added since the value was saved.
    pub(crate) fn attach_flat(&self, flat: FlatKvBackend, sync: bool) {
        let key = flat.key().to_string();
        {
            let mut core = self.lock();
            core.close_channel();
            core.retire_backend();
            core.settle();

            let default = &self.inner.default;
            let (state, seed) = match flat.get_blocking() {
                Ok(Some(stored)) => match serde_json::from_value::<T>(stored) {
                    Ok(stored) => (combine(default, stored, false), false),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "stored state has unexpected shape, using default");
                        (default.clone(), true)
                    }
                },
                Ok(None) => (default.clone(), true),
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "failed to hydrate state, using default");
                    (default.clone(), false)
                }
            };

            core.state = state;
            core.backend = Backend::Flat(flat);
            if seed && core.state.kind() != StateKind::Null {
                core.persist_current();
            }
        }

        tracing::debug!(key = %key, sync, "flat store attached");
        if sync {
            self.open_channel(&key);
        }
    }

    /// Attach an asynchronous backend and start hydrating it.
    ///
    /// Until hydration finishes, `get` fails with `NotReady`, updates apply
    /// in memory and are replayed on top of the hydrated value.
    pub(crate) fn attach_async(
        &self,
        adapter: Arc<dyn StorageAdapter>,
        transactional: Option<Arc<TransactionalBackend>>,
        sync: bool,
        runtime: &Handle,
    ) {
        let key = adapter.key().to_string();
        let generation = {
            let mut core = self.lock();
            core.close_channel();
            core.retire_backend();
            core.settle();
            core.initialized = false;
            core.hydrating = true;
            core.backend = Backend::Async {
                adapter: Arc::clone(&adapter),
                transactional,
                writer: PersistWriter::spawn(
                    Arc::clone(&adapter),
                    self.inner.config.persist.clone(),
                    runtime,
                ),
            };
            core.generation
        };
        self.inner.ready.send_replace(false);

        if sync {
            self.open_channel(&key);
        }

        tracing::debug!(key = %key, generation, sync, "hydrating store");
        let store = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            let load = tokio::spawn(async move {
                adapter.init().await?;
                adapter.get().await
            });
            let loaded = match load.await {
                Ok(loaded) => loaded,
                Err(e) => Err(StorageError::Task(e.to_string())),
            };
            if let Some(inner) = store.upgrade() {
                Store { inner }.finish_hydration(generation, loaded);
            }
        });
    }

    fn finish_hydration(&self, generation: u64, loaded: StorageResult<Option<Value>>) {
        let (mut state, seed) = {
            let core = self.lock();
            if core.generation != generation || !core.hydrating {
                tracing::debug!(generation, "discarding stale hydration");
                return;
            }

            let default = &self.inner.default;
            let (base, seed) = match loaded {
                Ok(Some(stored)) => match serde_json::from_value::<T>(stored) {
                    Ok(stored) => (stored, false),
                    Err(e) => {
                        tracing::warn!(key = core.label(), error = %e, "stored state has unexpected shape, using default");
                        (default.clone(), true)
                    }
                },
                Ok(None) => (default.clone(), true),
                Err(e) => {
                    tracing::error!(key = core.label(), error = %e, "failed to hydrate state, using default");
                    (default.clone(), false)
                }
            };
            (base, seed)
        };

        // Replay happens outside the lock, since recorded updaters are user
        // code. Changes that arrive meanwhile are picked up on the next pass.
        let mut replayed = 0;
        let mut rebroadcast = false;
        let (listeners, state) = loop {
            let mut core = self.lock();
            if core.generation != generation || !core.hydrating {
                tracing::debug!(generation, "discarding stale hydration");
                return;
            }

            if core.pending.is_empty() {
                core.state = state;
                core.hydrating = false;
                core.initialized = true;

                if replayed > 0 || (seed && core.state.kind() != StateKind::Null) {
                    if let Some(encoded) = core.encode() {
                        core.write_through(&encoded);
                        if rebroadcast {
                            core.broadcast(&SyncMessage::StateUpdate { state: encoded });
                        }
                    }
                }

                tracing::debug!(key = core.label(), replayed, "store hydrated");
                break (core.listeners(), core.state.clone());
            }

            let pending = std::mem::take(&mut core.pending);
            drop(core);

            replayed += pending.len();
            rebroadcast |= pending.iter().any(|p| !p.from_sync);
            for p in &pending {
                if let Some(next) = next_state(&state, &p.change) {
                    state = next;
                }
            }
        };

        self.inner.ready.send_replace(true);
        notify(&listeners, &state);
    }

    fn open_channel(&self, key: &str) {
        let name = channel_name(&self.inner.config.channel_prefix, key);
        let channel = match self.inner.channels.open_channel(&name) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(channel = %name, error = %e, "failed to open sync channel, continuing unsynced");
                return;
            }
        };

        let receiver = match Handle::try_current() {
            Ok(runtime) => match channel.subscribe() {
                Ok(inbox) => Some(runtime.spawn(receive_loop(Arc::downgrade(&self.inner), inbox))),
                Err(e) => {
                    tracing::warn!(channel = %name, error = %e, "failed to listen on sync channel");
                    None
                }
            },
            Err(_) => {
                tracing::warn!(channel = %name, "no tokio runtime, changes from other instances will not be received");
                None
            }
        };

        let previous = self.lock().channel.replace(Endpoint { channel, receiver });
        if let Some(previous) = previous {
            previous.close();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Re-pointing and teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Re-point a transactional store at another key in the same database
    /// and collection.
    ///
    /// Subscribers are kept; they are notified once the new key hydrates.
    /// An empty key detaches the store to memory-only.
    pub fn switch(&self, key: &str) -> Result<&Self> {
        if key.is_empty() {
            self.detach();
            return Ok(self);
        }

        let (next, sync) = {
            let core = self.lock();
            match &core.backend {
                Backend::Async {
                    transactional: Some(backend),
                    ..
                } => (Arc::new(backend.rebind(key)), core.channel.is_some()),
                _ => {
                    return Err(EchoError::AdapterMisuse(
                        "switch requires a transactional backend".to_string(),
                    ))
                }
            }
        };

        let runtime = Handle::try_current().map_err(|_| EchoError::NoRuntime)?;
        tracing::debug!(key, "switching store");
        self.attach_async(next.clone(), Some(next), sync, &runtime);
        Ok(self)
    }

    /// Drop the backend and channel and keep going memory-only.
    ///
    /// Persisted data is kept; queued writes still land.
    pub fn detach(&self) {
        {
            let mut core = self.lock();
            core.close_channel();
            core.retire_backend();
            core.settle();
        }
        self.inner.ready.send_replace(true);
        tracing::debug!("store detached");
    }

    /// Remove the persisted record of a transactional store and detach.
    ///
    /// Listeners are notified with the (unchanged) in-memory state.
    pub async fn discard(&self) -> Result<()> {
        let (adapter, worker) = {
            let mut core = self.lock();
            if !matches!(
                core.backend,
                Backend::Async {
                    transactional: Some(_),
                    ..
                }
            ) {
                return Err(EchoError::AdapterMisuse(
                    "discard requires a transactional backend".to_string(),
                ));
            }
            core.close_channel();
            let adapter = core.retire_backend();
            let worker = core.retired.pop();
            core.settle();
            (adapter, worker)
        };
        self.inner.ready.send_replace(true);

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "persistence worker ended abnormally");
            }
        }
        let result = match &adapter {
            Some(adapter) => {
                let removed = adapter.remove().await;
                adapter.close().await;
                removed
            }
            None => Ok(()),
        };

        let (listeners, state) = {
            let core = self.lock();
            (core.listeners(), core.state.clone())
        };
        notify(&listeners, &state);

        tracing::debug!("persisted state discarded");
        result.map_err(EchoError::from)
    }

    /// Tear the store down: close the channel, remove the persisted record
    /// and drop every listener. The in-memory state stays readable.
    ///
    /// Calling it again is a no-op.
    pub fn destroy(&self) {
        {
            let mut core = self.lock();
            core.close_channel();
            match std::mem::replace(&mut core.backend, Backend::None) {
                Backend::None => {}
                Backend::Flat(flat) => {
                    if let Err(e) = flat.remove_blocking() {
                        tracing::error!(key = flat.key(), error = %e, "failed to destroy persisted state");
                    }
                }
                Backend::Async { writer, .. } => {
                    let worker = writer.destroy();
                    core.retired.push(worker);
                }
            }
            core.listeners.clear();
            core.settle();
        }
        self.inner.ready.send_replace(true);
        tracing::debug!("store destroyed");
    }
}

async fn receive_loop<T: StateValue>(store: Weak<Inner<T>>, mut inbox: Inbox) {
    while let Some(message) = inbox.recv().await {
        let Some(inner) = store.upgrade() else {
            break;
        };
        Store { inner }.apply_remote(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_state_storage::MemoryBackend;
    use echo_state_sync::{BroadcastHub, HubConfig};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_store(default: Value) -> Store<Value> {
        Store::detached(
            default,
            EchoConfig::default(),
            BroadcastHub::new(HubConfig::default()),
        )
    }

    fn counting(store: &Store<Value>) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        calls
    }

    #[test]
    fn test_merge_and_replace() {
        let store = memory_store(json!({"a": 1, "b": 2}));

        store.set(json!({"b": 3}), SetOptions::default());
        assert_eq!(store.get().unwrap(), json!({"a": 1, "b": 3}));

        store.set(json!({"c": 4}), SetOptions::replace());
        assert_eq!(store.get().unwrap(), json!({"c": 4}));
    }

    #[test]
    fn test_equal_update_does_not_notify() {
        let store = memory_store(json!({"a": 1}));
        let calls = counting(&store);

        store.set(json!({"a": 1}), SetOptions::default());
        store.set(json!({"a": 1}), SetOptions::replace());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.set(json!({"a": 2}), SetOptions::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_updater_sees_current_state() {
        let store = memory_store(json!(1));
        store.set(
            Update::with(|n: &Value| json!(n.as_i64().unwrap_or(0) + 41)),
            SetOptions::default(),
        );
        assert_eq!(store.get().unwrap(), json!(42));
    }

    #[test]
    fn test_listener_may_reenter_store() {
        let store = memory_store(json!(0));
        let inner = store.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        store.subscribe(move |state| {
            log.lock().unwrap().push(inner.get().unwrap());
            assert_eq!(state, &inner.get().unwrap());
        });

        store.set(json!(5), SetOptions::default());
        assert_eq!(*seen.lock().unwrap(), vec![json!(5)]);
    }

    #[test]
    fn test_unsubscribe() {
        let store = memory_store(json!(0));
        let id = store.subscribe(|_| {});
        assert_eq!(store.listener_count(), 1);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_delete_null_is_noop() {
        let store = memory_store(Value::Null);
        let calls = counting(&store);
        store.delete("x");
        assert_eq!(store.get().unwrap(), Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reset_restores_default() {
        let store = memory_store(json!({"a": 1}));
        store.set(json!({"b": 2}), SetOptions::default());
        store.reset();
        assert_eq!(store.get().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_memory_only_introspection() {
        let store = memory_store(json!(null));
        assert_eq!(store.variant(), StoreVariant::MemoryOnly);
        assert_eq!(store.key(), None);
        assert!(store.is_initialized());
        assert!(matches!(store.database_name(), Err(EchoError::AdapterMisuse(_))));
        assert!(matches!(store.key_name(), Err(EchoError::AdapterMisuse(_))));
        assert!(matches!(store.switch("other"), Err(EchoError::AdapterMisuse(_))));
    }

    #[tokio::test]
    async fn test_switch_requires_transactional_backend() {
        let store = memory_store(json!(null));
        assert!(matches!(store.switch("other"), Err(EchoError::AdapterMisuse(_))));

        let custom = memory_store(json!(null));
        custom.attach_async(Arc::new(MemoryBackend::new("k")), None, false, &Handle::current());
        custom.ready(None, SetOptions::default()).await;
        assert!(matches!(custom.switch("other"), Err(EchoError::AdapterMisuse(_))));
        assert!(matches!(custom.discard().await, Err(EchoError::AdapterMisuse(_))));
    }

    #[tokio::test]
    async fn test_stale_hydration_is_discarded() {
        let store = memory_store(json!("default"));
        store.attach_async(
            Arc::new(MemoryBackend::with_value("k", json!("stored"))),
            None,
            false,
            &Handle::current(),
        );
        let stale = store.lock().generation;
        store.detach();

        store.finish_hydration(stale, Ok(Some(json!("late"))));
        assert_eq!(store.get().unwrap(), json!("default"));
    }
}
