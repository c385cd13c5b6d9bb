//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{Map, Number, Value};

/// A short mapping key.
pub fn state_key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}".prop_map(String::from)
}

/// A JSON scalar: null, boolean, integer, finite float or string.
pub fn json_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e9f64..1.0e9f64)
            .prop_filter_map("finite", Number::from_f64)
            .prop_map(Value::Number),
        "[ -~]{0,12}".prop_map(Value::String),
    ]
}

/// An arbitrary JSON value, nested up to `depth` levels.
pub fn json_value(depth: u32) -> impl Strategy<Value = Value> {
    json_scalar().prop_recursive(depth, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(state_key(), inner, 0..6)
                .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// A JSON object with arbitrary values, the shape partial updates merge into.
pub fn json_mapping() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(state_key(), json_value(2), 0..8)
        .prop_map(|map| Value::Object(map.into_iter().collect()))
}

/// One store operation.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// `set(partial, replace)`.
    Set { partial: Value, replace: bool },
    /// `delete(key)`.
    Delete(String),
}

/// An operation against mapping state.
pub fn store_op() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => (json_mapping(), any::<bool>())
            .prop_map(|(partial, replace)| StoreOp::Set { partial, replace }),
        1 => state_key().prop_map(StoreOp::Delete),
    ]
}

/// A sequence of operations.
pub fn store_ops(max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op(), 1..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_mappings_are_objects(value in json_mapping()) {
            prop_assert!(value.is_object());
        }

        #[test]
        fn test_op_sequences_are_bounded(ops in store_ops(5)) {
            prop_assert!(!ops.is_empty() && ops.len() <= 5);
        }
    }
}
