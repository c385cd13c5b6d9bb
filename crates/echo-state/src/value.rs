//! State values: the shapes a store can hold and how updates combine.
//!
//! A store's state is classified as null, scalar, mapping or sequence. Only
//! mapping state is shallow-merged by partial updates; every other shape is
//! replaced outright.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Structural classification of a state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// Absent value. Persisting it removes the record.
    Null,
    /// String, number or boolean.
    Scalar,
    /// String-keyed record, shallow-merged by partial updates.
    Mapping,
    /// Ordered list, always replaced.
    Sequence,
}

/// A value a store can hold.
///
/// Implementations must keep `merge` and `without_key` pure: they return a
/// new value and never touch `self`.
pub trait StateValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Classify this value.
    fn kind(&self) -> StateKind;

    /// Shallow-merge `partial` into this mapping.
    ///
    /// Only called when `self.kind()` is [`StateKind::Mapping`]. Keys of
    /// `partial` overwrite keys of `self`; a non-mapping `partial` replaces
    /// the value.
    fn merge(&self, partial: Self) -> Self;

    /// The value with `key` deleted, or `None` when deletion is a no-op for
    /// this shape.
    fn without_key(&self, key: &str) -> Option<Self>;

    /// Structural equality used to drop no-op updates.
    fn is_equal(&self, other: &Self) -> bool;
}

/// Structural equality of two JSON values.
///
/// Mappings compare key count then every key recursively, sequences compare
/// length then every index, everything else compares by value.
pub fn is_equal(a: &Value, b: &Value) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| is_equal(v, other)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| is_equal(l, r))
        }
        (Value::Number(x), Value::Number(y)) => match (integer(x), integer(y)) {
            (Some(l), Some(r)) => l == r,
            _ => match (x.as_f64(), y.as_f64()) {
                (Some(l), Some(r)) => l == r,
                _ => x == y,
            },
        },
        _ => a == b,
    }
}

/// Integers compare exactly; only floats go through `f64`.
fn integer(n: &serde_json::Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Parse `key` as an in-bounds index into a sequence of `len` items.
fn sequence_index(key: &str, len: usize) -> Option<usize> {
    key.parse::<usize>().ok().filter(|&i| i < len)
}

impl StateValue for Value {
    fn kind(&self) -> StateKind {
        match self {
            Value::Null => StateKind::Null,
            Value::Object(_) => StateKind::Mapping,
            Value::Array(_) => StateKind::Sequence,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => StateKind::Scalar,
        }
    }

    fn merge(&self, partial: Self) -> Self {
        match (self, partial) {
            (Value::Object(current), Value::Object(partial)) => {
                let mut merged = current.clone();
                merged.extend(partial);
                Value::Object(merged)
            }
            (_, partial) => partial,
        }
    }

    fn without_key(&self, key: &str) -> Option<Self> {
        match self {
            Value::Null | Value::Bool(_) => None,
            Value::Object(map) => {
                let mut next = map.clone();
                next.remove(key);
                Some(Value::Object(next))
            }
            Value::String(_) => Some(Value::String(String::new())),
            Value::Number(_) => Some(Value::from(-1)),
            Value::Array(items) => sequence_index(key, items.len()).map(|i| {
                let mut next = items.clone();
                next.remove(i);
                Value::Array(next)
            }),
        }
    }

    fn is_equal(&self, other: &Self) -> bool {
        is_equal(self, other)
    }
}

impl StateValue for String {
    fn kind(&self) -> StateKind {
        StateKind::Scalar
    }

    fn merge(&self, partial: Self) -> Self {
        partial
    }

    fn without_key(&self, _key: &str) -> Option<Self> {
        Some(String::new())
    }

    fn is_equal(&self, other: &Self) -> bool {
        self == other
    }
}

impl StateValue for i64 {
    fn kind(&self) -> StateKind {
        StateKind::Scalar
    }

    fn merge(&self, partial: Self) -> Self {
        partial
    }

    fn without_key(&self, _key: &str) -> Option<Self> {
        Some(-1)
    }

    fn is_equal(&self, other: &Self) -> bool {
        self == other
    }
}

impl StateValue for f64 {
    fn kind(&self) -> StateKind {
        StateKind::Scalar
    }

    fn merge(&self, partial: Self) -> Self {
        partial
    }

    fn without_key(&self, _key: &str) -> Option<Self> {
        Some(-1.0)
    }

    fn is_equal(&self, other: &Self) -> bool {
        self == other
    }
}

impl StateValue for bool {
    fn kind(&self) -> StateKind {
        StateKind::Scalar
    }

    fn merge(&self, partial: Self) -> Self {
        partial
    }

    fn without_key(&self, _key: &str) -> Option<Self> {
        None
    }

    fn is_equal(&self, other: &Self) -> bool {
        self == other
    }
}

impl<V: StateValue> StateValue for Vec<V> {
    fn kind(&self) -> StateKind {
        StateKind::Sequence
    }

    fn merge(&self, partial: Self) -> Self {
        partial
    }

    fn without_key(&self, key: &str) -> Option<Self> {
        sequence_index(key, self.len()).map(|i| {
            let mut next = self.clone();
            next.remove(i);
            next
        })
    }

    fn is_equal(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(l, r)| l.is_equal(r))
    }
}

impl<V: StateValue> StateValue for BTreeMap<String, V> {
    fn kind(&self) -> StateKind {
        StateKind::Mapping
    }

    fn merge(&self, partial: Self) -> Self {
        let mut merged = self.clone();
        merged.extend(partial);
        merged
    }

    fn without_key(&self, key: &str) -> Option<Self> {
        let mut next = self.clone();
        next.remove(key);
        Some(next)
    }

    fn is_equal(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.is_equal(o)))
    }
}

impl<V, H> StateValue for HashMap<String, V, H>
where
    V: StateValue,
    H: BuildHasher + Default + Clone + Send + Sync + 'static,
{
    fn kind(&self) -> StateKind {
        StateKind::Mapping
    }

    fn merge(&self, partial: Self) -> Self {
        let mut merged = self.clone();
        merged.extend(partial);
        merged
    }

    fn without_key(&self, key: &str) -> Option<Self> {
        let mut next = self.clone();
        next.remove(key);
        Some(next)
    }

    fn is_equal(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.is_equal(o)))
    }
}

impl<S: StateValue> StateValue for Option<S> {
    fn kind(&self) -> StateKind {
        match self {
            None => StateKind::Null,
            Some(inner) => inner.kind(),
        }
    }

    fn merge(&self, partial: Self) -> Self {
        match (self, partial) {
            (Some(current), Some(partial)) => Some(current.merge(partial)),
            (_, partial) => partial,
        }
    }

    fn without_key(&self, key: &str) -> Option<Self> {
        self.as_ref()
            .and_then(|inner| inner.without_key(key))
            .map(Some)
    }

    fn is_equal(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(l), Some(r)) => l.is_equal(r),
            _ => false,
        }
    }
}
