//! # Echo State Testkit
//!
//! Testing utilities for Echo stores.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: broadcast frames and state transitions every
//!   implementation must agree on
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: simulated processes, recording channels and a scriptable
//!   backend
//!
//! ## Golden Vectors
//!
//! ```rust
//! use echo_state_testkit::vectors::verify_wire_vectors;
//!
//! for (name, matches) in verify_wire_vectors() {
//!     assert!(matches, "{}", name);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use echo_state::StateValue;
//! use echo_state_testkit::generators::json_value;
//!
//! proptest! {
//!     #[test]
//!     fn is_equal_is_reflexive(value in json_value(3)) {
//!         prop_assert!(value.is_equal(&value.clone()));
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Two processes sharing a broadcast hub, each with its own data directory:
//!
//! ```rust
//! use echo_state_testkit::fixtures::processes;
//!
//! let (_hub, procs) = processes(2);
//! let store = procs[0].echo.store(serde_json::json!(0)).memory_only();
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    eventually, fast_persist, init_tracing, processes, RecordingProvider, ScriptedBackend,
    SimulatedProcess,
};
pub use generators::{json_mapping, json_value, store_ops, StoreOp};
pub use vectors::{transition_vectors, verify_wire_vectors, wire_vectors, TransitionVector, VectorOp, WireVector};
