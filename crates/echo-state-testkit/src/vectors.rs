//! Golden vectors for cross-implementation verification.
//!
//! Wire vectors pin the broadcast frame format, so stores written in other
//! languages can share a channel with these ones. Transition vectors pin how
//! each update kind combines with each state shape.

use echo_state::sync::SyncMessage;
use serde_json::Value;

/// A broadcast frame and the message it carries.
#[derive(Debug, Clone)]
pub struct WireVector {
    pub name: &'static str,
    /// The frame as JSON text.
    pub frame: &'static str,
}

impl WireVector {
    /// Parse the frame text into a JSON value.
    pub fn frame_value(&self) -> Value {
        parse(self.frame)
    }
}

/// Get all wire vectors.
pub fn wire_vectors() -> Vec<WireVector> {
    vec![
        WireVector {
            name: "update with mapping state",
            frame: r#"{"type":"state-update","state":{"theme":"dark","volume":5}}"#,
        },
        WireVector {
            name: "update with null state",
            frame: r#"{"type":"state-update","state":null}"#,
        },
        WireVector {
            name: "update with sequence state",
            frame: r#"{"type":"state-update","state":[1,"two",{"three":3}]}"#,
        },
        WireVector {
            name: "delete of a key",
            frame: r#"{"type":"state-delete","key":"volume"}"#,
        },
        WireVector {
            name: "delete of an empty key",
            frame: r#"{"type":"state-delete","key":""}"#,
        },
    ]
}

/// An operation applied in a transition vector.
#[derive(Debug, Clone)]
pub enum VectorOp {
    Merge(&'static str),
    Replace(&'static str),
    Delete(&'static str),
}

/// A state, an operation, and the state it must produce.
#[derive(Debug, Clone)]
pub struct TransitionVector {
    pub name: &'static str,
    pub before: &'static str,
    pub op: VectorOp,
    pub after: &'static str,
}

impl TransitionVector {
    pub fn before_value(&self) -> Value {
        parse(self.before)
    }

    pub fn after_value(&self) -> Value {
        parse(self.after)
    }
}

/// Get all transition vectors.
pub fn transition_vectors() -> Vec<TransitionVector> {
    vec![
        TransitionVector {
            name: "merge adds and overwrites keys",
            before: r#"{"a":1,"b":2}"#,
            op: VectorOp::Merge(r#"{"b":3,"c":4}"#),
            after: r#"{"a":1,"b":3,"c":4}"#,
        },
        TransitionVector {
            name: "merge is shallow",
            before: r#"{"n":{"x":1,"y":2}}"#,
            op: VectorOp::Merge(r#"{"n":{"x":9}}"#),
            after: r#"{"n":{"x":9}}"#,
        },
        TransitionVector {
            name: "replace drops missing keys",
            before: r#"{"a":1,"b":2}"#,
            op: VectorOp::Replace(r#"{"c":3}"#),
            after: r#"{"c":3}"#,
        },
        TransitionVector {
            name: "scalar is replaced even without replace",
            before: r#"5"#,
            op: VectorOp::Merge(r#"10"#),
            after: r#"10"#,
        },
        TransitionVector {
            name: "null is replaced even without replace",
            before: r#"null"#,
            op: VectorOp::Merge(r#"{"a":1}"#),
            after: r#"{"a":1}"#,
        },
        TransitionVector {
            name: "sequence is replaced even without replace",
            before: r#"[1,2,3]"#,
            op: VectorOp::Merge(r#"[4]"#),
            after: r#"[4]"#,
        },
        TransitionVector {
            name: "non-mapping partial replaces mapping state",
            before: r#"{"a":1}"#,
            op: VectorOp::Merge(r#""text""#),
            after: r#""text""#,
        },
        TransitionVector {
            name: "delete removes a mapping key",
            before: r#"{"a":1,"b":2}"#,
            op: VectorOp::Delete("a"),
            after: r#"{"b":2}"#,
        },
        TransitionVector {
            name: "delete of a missing key changes nothing",
            before: r#"{"a":1}"#,
            op: VectorOp::Delete("z"),
            after: r#"{"a":1}"#,
        },
        TransitionVector {
            name: "delete empties a string",
            before: r#""hello""#,
            op: VectorOp::Delete("anything"),
            after: r#""""#,
        },
        TransitionVector {
            name: "delete sets a number to -1",
            before: r#"42"#,
            op: VectorOp::Delete("anything"),
            after: r#"-1"#,
        },
        TransitionVector {
            name: "delete leaves null alone",
            before: r#"null"#,
            op: VectorOp::Delete("anything"),
            after: r#"null"#,
        },
        TransitionVector {
            name: "delete leaves a boolean alone",
            before: r#"true"#,
            op: VectorOp::Delete("anything"),
            after: r#"true"#,
        },
        TransitionVector {
            name: "delete removes a sequence index",
            before: r#"["a","b","c"]"#,
            op: VectorOp::Delete("1"),
            after: r#"["a","c"]"#,
        },
    ]
}

/// Decode every wire vector and re-encode it; report mismatches by name.
pub fn verify_wire_vectors() -> Vec<(String, bool)> {
    wire_vectors()
        .iter()
        .map(|v| {
            let matches = SyncMessage::decode(v.frame.as_bytes())
                .and_then(|message| message.encode())
                .map(|bytes| serde_json::from_slice::<Value>(&bytes).ok() == Some(v.frame_value()))
                .unwrap_or(false);
            (v.name.to_string(), matches)
        })
        .collect()
}

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|e| panic!("bad vector JSON {}: {}", text, e))
}
