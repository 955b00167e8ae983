//! Deterministic, pure logic shared by the fleet daemon.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod graph;
pub mod invariants;
pub mod scheduler;
pub mod state;
pub mod transitions;
pub mod types;
