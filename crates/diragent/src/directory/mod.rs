//! Built-in directory providers
//!
//! Backends that ship with the binary. Production connectors live in their
//! own crates and implement [`Provider`](crate::Provider) the same way.

pub mod memory;

pub use memory::{Fixture, FixtureAccount, FixtureGroup, MemoryDirectory};
