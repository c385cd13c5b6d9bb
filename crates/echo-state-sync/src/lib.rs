//! # Echo State Sync
//!
//! Best-effort broadcast for keeping several instances of the same logical
//! store in step (for example, one per application window).
//!
//! ## Overview
//!
//! Every store with sync enabled opens one endpoint on a channel named after
//! its key. After each local change it posts a [`SyncMessage`]; every other
//! endpoint on that channel applies it as an authoritative replace.
//!
//! ## Key Properties
//!
//! - **Fire-and-forget**: posting never waits and never fails because nobody
//!   is listening
//! - **At-most-once, unordered**: a missed message is never replayed
//! - **No echo**: an endpoint never receives its own posts
//!
//! The durable backend, not the channel, is what lets an instance that was
//! not running catch up.
//!
//! ## Usage
//!
//! ```rust
//! use echo_state_sync::{BroadcastHub, HubConfig, SyncChannel, SyncMessage};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = BroadcastHub::new(HubConfig::default());
//! let window_a = hub.open("echo-settings");
//! let window_b = hub.open("echo-settings");
//!
//! let mut inbox = window_b.subscribe().unwrap();
//! window_a
//!     .post(&SyncMessage::StateUpdate { state: json!({"theme": "dark"}) })
//!     .unwrap();
//!
//! assert!(matches!(inbox.recv().await, Some(SyncMessage::StateUpdate { .. })));
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod messages;

pub use channel::hub::{BroadcastHub, HubChannel, HubConfig};
pub use channel::{ChannelProvider, Frame, Inbox, SyncChannel};
pub use error::{Result, SyncError};
pub use messages::{channel_name, EndpointId, SyncMessage, DEFAULT_CHANNEL_PREFIX};
