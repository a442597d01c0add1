//! `DurableStore` implementations.
//!
//! Currently includes [`MemoryDurableStore`] for embedding and tests. SQL
//! backends live with the persistence layer and implement the same trait.

mod memory;

pub use memory::MemoryDurableStore;
