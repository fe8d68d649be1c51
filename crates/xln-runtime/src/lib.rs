//! The runtime: a tick-driven pure reducer routing messages between
//! entity replicas.
//!
//! `apply_runtime_tick(env, inputs, now_ts)` is the only way the world
//! advances. No I/O, no wall clock, no randomness happens inside it; the
//! driver owns delivery, persistence and time.

pub mod adapters;
pub mod env;
pub mod tick;

pub use adapters::{Jurisdiction, LoopbackTransport, MockJurisdiction, Transport};
pub use env::{create_env, Env, KeyStore, Outbox, ReplicaKey};
pub use tick::apply_runtime_tick;
