//! `HotStore` implementations.

mod memory;

pub use memory::MemoryHotStore;
