//! Broadcast wire format.
//!
//! Frames are JSON objects tagged by `type`:
//!
//! ```text
//! { "type": "state-update", "state": <value> }
//! { "type": "state-delete", "key": "<key>" }
//! ```
//!
//! There is no versioning and no authentication; the trust boundary is the
//! host and the application install.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Identity of one endpoint on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u64);

impl EndpointId {
    /// Generate a random endpoint ID.
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }
}

/// Default prefix of channel names.
pub const DEFAULT_CHANNEL_PREFIX: &str = "echo-";

/// Derive the channel name for a store key.
pub fn channel_name(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// Messages exchanged between endpoints of the same logical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncMessage {
    /// The sender committed a new full state.
    StateUpdate {
        /// The complete new state.
        state: Value,
    },

    /// The sender deleted `key`; receivers re-derive the deletion locally.
    StateDelete {
        /// The deleted key.
        key: String,
    },
}

impl SyncMessage {
    /// Encode to a JSON frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a JSON frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use serde_json::json;

    #[test]
    fn test_update_wire_format() {
        let msg = SyncMessage::StateUpdate {
            state: json!({"count": 1}),
        };
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "state-update", "state": {"count": 1}}));
    }

    #[test]
    fn test_delete_wire_format() {
        let msg = SyncMessage::StateDelete { key: "a".into() };
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "state-delete", "key": "a"}));
    }

    #[test]
    fn test_decode_foreign_frame() {
        let frame = br#"{"type":"state-update","state":null}"#;
        assert_eq!(
            SyncMessage::decode(frame).unwrap(),
            SyncMessage::StateUpdate { state: Value::Null }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = SyncMessage::decode(br#"{"type":"state-reset"}"#).unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_name(DEFAULT_CHANNEL_PREFIX, "settings"), "echo-settings");
    }
}
