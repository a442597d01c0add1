//! Storage collaborators of the engine.
//!
//! Provides the two store abstractions the engine is written against:
//!
//! - [`HotStore`]: fast Redis-like store serving counters, relation sets and
//!   recent time-windowed metrics
//! - [`DurableStore`]: relational backend holding the durable, queryable copy
//!
//! plus in-process implementations of both ([`MemoryHotStore`],
//! [`MemoryDurableStore`]) for embedding and tests.

pub mod datastores;
pub mod durable_store;
pub mod engines;
pub mod hot_store;

pub use datastores::MemoryDurableStore;
pub use durable_store::*;
pub use engines::MemoryHotStore;
pub use hot_store::*;
