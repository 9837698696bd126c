//! Testing utilities for kafka_eos
//!
//! Fakes for the collaborators the pool, claim loop and admin helpers talk
//! to, so their logic can be tested without a broker. Only compiled when
//! running tests.
//!
//! # Organization
//! - `mocks.rs` - In-memory stand-ins for producers, sessions, sinks and the cluster
//! - `helpers.rs` - Functions building scripted claims and factories

#![cfg(test)]

pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use helpers::{failing_factory, scripted_claim};
pub use mocks::{FakeProducer, InMemoryCluster, ProducerProbe, RecordingSession, RecordingSink};
