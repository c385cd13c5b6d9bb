//! Golden vector tests.
//!
//! Every state transition vector must hold for a live store, and every
//! frame a store broadcasts must match the pinned wire format.

use echo_state::sync::SyncMessage;
use echo_state::{Echo, EchoConfig, SetOptions, TransactionalConfig};
use echo_state_testkit::vectors::{transition_vectors, wire_vectors, VectorOp};
use echo_state_testkit::RecordingProvider;
use serde_json::{json, Value};

fn memory_echo() -> Echo {
    Echo::new(EchoConfig::default(), RecordingProvider::new())
}

#[test]
fn test_transition_vectors() {
    let echo = memory_echo();

    for vector in transition_vectors() {
        let store = echo.store(vector.before_value()).memory_only();
        match &vector.op {
            VectorOp::Merge(partial) => {
                store.set(serde_json::from_str::<Value>(partial).unwrap(), SetOptions::default())
            }
            VectorOp::Replace(value) => {
                store.set(serde_json::from_str::<Value>(value).unwrap(), SetOptions::replace())
            }
            VectorOp::Delete(key) => store.delete(key),
        }

        assert_eq!(
            store.get().unwrap(),
            vector.after_value(),
            "transition vector failed: {}",
            vector.name
        );
    }
}

#[test]
fn test_wire_vectors_decode() {
    for vector in wire_vectors() {
        let message = SyncMessage::decode(vector.frame.as_bytes())
            .unwrap_or_else(|e| panic!("{}: {}", vector.name, e));
        let encoded: Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(encoded, vector.frame_value(), "wire vector failed: {}", vector.name);
    }
}

#[tokio::test]
async fn test_broadcast_frames_match_wire_format() {
    let provider = RecordingProvider::new();
    let dir = tempfile::tempdir().unwrap();
    let echo = Echo::new(EchoConfig::with_data_dir(dir.path()), provider.clone());

    let store = echo
        .store(json!({"theme": "light", "volume": 5}))
        .with_transactional_backend(TransactionalConfig::new("app", "settings").sync(true))
        .unwrap();
    store.ready(None, SetOptions::default()).await;

    store.set(json!({"theme": "dark"}), SetOptions::default());
    store.delete("volume");

    let posts = provider.posts();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|(channel, _)| channel == "echo-settings"));

    let frames: Vec<Value> = posts
        .iter()
        .map(|(_, message)| serde_json::from_slice(&message.encode().unwrap()).unwrap())
        .collect();
    assert_eq!(
        frames[0],
        json!({"type": "state-update", "state": {"theme": "dark", "volume": 5}})
    );
    assert_eq!(frames[1], json!({"type": "state-delete", "key": "volume"}));
}
