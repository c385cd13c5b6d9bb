//! Channel abstraction for cross-instance state broadcast.
//!
//! A channel is a named, best-effort, fire-and-forget fan-out: a message
//! posted on an endpoint reaches every *other* endpoint currently open on the
//! same name, at most once, in no guaranteed order, with no acknowledgment.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::Result;
use crate::messages::{EndpointId, SyncMessage};

/// One encoded message plus the endpoint that posted it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The posting endpoint.
    pub from: EndpointId,
    /// JSON-encoded [`SyncMessage`].
    pub payload: Vec<u8>,
}

/// Channel trait for posting and receiving sync messages.
///
/// Implementations must be thread-safe (Send + Sync).
pub trait SyncChannel: Send + Sync {
    /// The channel name shared by all endpoints of one logical store.
    fn name(&self) -> &str;

    /// This endpoint's identity.
    fn endpoint_id(&self) -> EndpointId;

    /// Post a message to every other endpoint. Never waits for delivery.
    fn post(&self, message: &SyncMessage) -> Result<()>;

    /// Open a receiver for messages posted by other endpoints.
    fn subscribe(&self) -> Result<Inbox>;

    /// Close this endpoint. Later posts fail with `SyncError::Closed`.
    fn close(&self);
}

/// Opens channel endpoints by name.
///
/// One provider stands for one host: endpoints opened through the same
/// provider under the same name reach each other.
pub trait ChannelProvider: Send + Sync {
    /// Open a new endpoint on channel `name`.
    fn open_channel(&self, name: &str) -> Result<Arc<dyn SyncChannel>>;
}

/// Receiving side of an endpoint.
///
/// Skips frames posted by its own endpoint and frames that fail to decode.
pub struct Inbox {
    endpoint: EndpointId,
    receiver: broadcast::Receiver<Frame>,
}

impl Inbox {
    /// Wrap a frame receiver for `endpoint`.
    pub fn new(endpoint: EndpointId, receiver: broadcast::Receiver<Frame>) -> Self {
        Self { endpoint, receiver }
    }

    /// Receive the next message from another endpoint.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) => {
                    if frame.from == self.endpoint {
                        continue;
                    }
                    match SyncMessage::decode(&frame.payload) {
                        Ok(message) => return Some(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping undecodable sync frame");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // At-most-once delivery: lagged frames are simply lost.
                    tracing::warn!(skipped, "sync inbox lagged, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// An in-process broadcast hub.
///
/// Every endpoint opened on the same hub under the same name shares one
/// broadcast bus. Several store instances (or simulated processes) sharing
/// one hub behave like windows of one application on one host.
pub mod hub {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError, Weak};

    use crate::error::SyncError;

    /// Configuration for the hub.
    #[derive(Debug, Clone)]
    pub struct HubConfig {
        /// Frames buffered per channel before slow receivers start losing them.
        pub capacity: usize,
    }

    impl Default for HubConfig {
        fn default() -> Self {
            Self { capacity: 256 }
        }
    }

    type Bus = broadcast::Sender<Frame>;

    /// Shared state for all channels of the hub.
    ///
    /// Buses are owned by their endpoints; the hub keeps weak handles and
    /// forgets a name once its last endpoint is dropped.
    pub struct BroadcastHub {
        config: HubConfig,
        buses: Mutex<HashMap<String, Weak<Bus>>>,
    }

    impl BroadcastHub {
        /// Create a new hub.
        pub fn new(config: HubConfig) -> Arc<Self> {
            Arc::new(Self {
                config,
                buses: Mutex::new(HashMap::new()),
            })
        }

        /// Open a new endpoint on channel `name`.
        pub fn open(&self, name: &str) -> HubChannel {
            let sender = {
                let mut buses = self.buses.lock().unwrap_or_else(PoisonError::into_inner);
                buses.retain(|_, bus| bus.strong_count() > 0);
                match buses.get(name).and_then(Weak::upgrade) {
                    Some(bus) => bus,
                    None => {
                        let bus = Arc::new(broadcast::channel(self.config.capacity.max(1)).0);
                        buses.insert(name.to_string(), Arc::downgrade(&bus));
                        bus
                    }
                }
            };

            HubChannel {
                name: name.to_string(),
                endpoint: EndpointId::random(),
                sender,
                closed: AtomicBool::new(false),
            }
        }

        /// Number of receivers currently listening on `name`.
        pub fn listener_count(&self, name: &str) -> usize {
            let buses = self.buses.lock().unwrap_or_else(PoisonError::into_inner);
            buses
                .get(name)
                .and_then(Weak::upgrade)
                .map(|bus| bus.receiver_count())
                .unwrap_or(0)
        }

        /// Number of channel names with at least one open endpoint.
        pub fn channel_count(&self) -> usize {
            let buses = self.buses.lock().unwrap_or_else(PoisonError::into_inner);
            buses.values().filter(|bus| bus.strong_count() > 0).count()
        }
    }

    impl ChannelProvider for BroadcastHub {
        fn open_channel(&self, name: &str) -> Result<Arc<dyn SyncChannel>> {
            Ok(Arc::new(self.open(name)))
        }
    }

    impl Default for BroadcastHub {
        fn default() -> Self {
            Self {
                config: HubConfig::default(),
                buses: Mutex::new(HashMap::new()),
            }
        }
    }

    /// One endpoint on a hub channel.
    pub struct HubChannel {
        name: String,
        endpoint: EndpointId,
        sender: Arc<Bus>,
        closed: AtomicBool,
    }

    impl SyncChannel for HubChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn endpoint_id(&self) -> EndpointId {
            self.endpoint
        }

        fn post(&self, message: &SyncMessage) -> Result<()> {
            if self.closed.load(Ordering::Acquire) {
                return Err(SyncError::Closed);
            }
            let frame = Frame {
                from: self.endpoint,
                payload: message.encode()?,
            };
            // No receivers is not an error: nobody else is open right now.
            let _ = self.sender.send(frame);
            Ok(())
        }

        fn subscribe(&self) -> Result<Inbox> {
            if self.closed.load(Ordering::Acquire) {
                return Err(SyncError::Closed);
            }
            Ok(Inbox::new(self.endpoint, self.sender.subscribe()))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }
}
