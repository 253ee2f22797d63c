//! Deterministic, pure logic shared by discovery, listing and scheduling.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod labels;
pub mod path;
pub mod shard;
pub mod tags;
pub mod types;
