//! Update pipeline properties: idempotence, merge vs replace, deletion.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use echo_state::{is_equal, Echo, EchoConfig, SetOptions, StateValue, Store, Update};
use echo_state_testkit::generators::{json_mapping, json_value, store_ops, StoreOp};
use echo_state_testkit::{RecordingProvider, ScriptedBackend};
use proptest::prelude::*;
use serde_json::{json, Value};

fn echo() -> Echo {
    Echo::new(EchoConfig::default(), RecordingProvider::new())
}

fn notifications<T: StateValue>(store: &Store<T>) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    store.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    calls
}

#[tokio::test]
async fn test_idempotent_set_notifies_and_persists_once() {
    let backend = Arc::new(ScriptedBackend::with_value("k", json!({"a": 0})));
    let store = echo()
        .store(json!({}))
        .with_backend(backend.clone(), false)
        .unwrap();
    store.ready(None, SetOptions::default()).await;
    let calls = notifications(&store);

    store.set(json!({"a": 1}), SetOptions::default());
    store.set(json!({"a": 1}), SetOptions::default());
    store.flush().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.writes(), vec![json!({"a": 1})]);
}

#[test]
fn test_merge_vs_replace() {
    let store = echo().store(json!({"a": 1, "b": 2})).memory_only();
    store.set(json!({"b": 3}), SetOptions::default());
    assert_eq!(store.get().unwrap(), json!({"a": 1, "b": 3}));

    let store = echo().store(json!({"a": 1, "b": 2})).memory_only();
    store.set(json!({"b": 3}), SetOptions::replace());
    assert_eq!(store.get().unwrap(), json!({"b": 3}));
}

#[test]
fn test_scalar_and_null_are_replaced() {
    for options in [SetOptions::default(), SetOptions::replace()] {
        let store = echo().store(json!(5)).memory_only();
        store.set(json!(9), options);
        assert_eq!(store.get().unwrap(), json!(9));

        let store = echo().store(Value::Null).memory_only();
        store.set(json!({"a": 1}), options);
        assert_eq!(store.get().unwrap(), json!({"a": 1}));
    }
}

#[test]
fn test_delete_semantics() {
    let store = echo().store(json!({"a": 1, "b": 2})).memory_only();
    store.delete("a");
    assert_eq!(store.get().unwrap(), json!({"b": 2}));

    let store = echo().store(json!("x")).memory_only();
    store.delete("anything");
    assert_eq!(store.get().unwrap(), json!(""));

    let store = echo().store(json!(3)).memory_only();
    store.delete("anything");
    assert_eq!(store.get().unwrap(), json!(-1));
}

#[test]
fn test_typed_state() {
    let mut default = BTreeMap::new();
    default.insert("volume".to_string(), 5i64);
    let store = echo().store(default).memory_only();

    let mut partial = BTreeMap::new();
    partial.insert("brightness".to_string(), 80i64);
    store.set(partial, SetOptions::default());
    store.delete("volume");

    let state = store.get().unwrap();
    assert_eq!(state.len(), 1);
    assert_eq!(state.get("brightness"), Some(&80));

    let counter = echo().store(0i64).memory_only();
    counter.set(Update::with(|n: &i64| n + 1), SetOptions::default());
    counter.set(Update::with(|n: &i64| n + 1), SetOptions::default());
    assert_eq!(counter.get().unwrap(), 2);
}

#[test]
fn test_listeners_see_committed_state_in_order() {
    let store = echo().store(json!(0)).memory_only();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    store.subscribe(move |state| log.lock().unwrap().push(state.clone()));

    for n in 1..=3 {
        store.set(json!(n), SetOptions::default());
    }
    assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2), json!(3)]);
}

fn apply(store: &Store<Value>, op: &StoreOp) {
    match op {
        StoreOp::Set { partial, replace } => store.set(
            partial.clone(),
            SetOptions {
                replace: *replace,
                from_sync: false,
            },
        ),
        StoreOp::Delete(key) => store.delete(key),
    }
}

proptest! {
    #[test]
    fn prop_is_equal_reflexive(value in json_value(3)) {
        prop_assert!(is_equal(&value, &value.clone()));
    }

    #[test]
    fn prop_is_equal_symmetric(a in json_value(2), b in json_value(2)) {
        prop_assert_eq!(is_equal(&a, &b), is_equal(&b, &a));
    }

    #[test]
    fn prop_merge_is_idempotent(state in json_mapping(), partial in json_mapping()) {
        let once = state.merge(partial.clone());
        let twice = once.merge(partial);
        prop_assert!(is_equal(&once, &twice));
    }

    #[test]
    fn prop_repeated_set_is_noop(state in json_mapping(), ops in store_ops(6)) {
        let store = echo().store(state).memory_only();
        for op in &ops {
            apply(&store, op);
        }

        let calls = notifications(&store);
        let current = store.get().unwrap();
        store.set(current.clone(), SetOptions::default());
        store.set(current, SetOptions::replace());
        prop_assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
