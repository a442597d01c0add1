//! Write-behind batching.
//!
//! - [`BatchTaskManager`]: per-stream buffer with a hybrid size/time flush
//!   trigger and failure compensation
//! - [`StreamRegistry`]: name-keyed, type-erased collection of managers
//! - [`RelationSink`]: flush callback for relation edge streams

mod buffer;
pub mod manager;
pub mod registry;
pub mod relation_sink;
mod timer;

pub use manager::{
    BatchTaskManager, BatchWriter, FlushReason, FlushStats, FnWriter, OperationKey,
    OperationValue,
};
pub use registry::{StreamHandle, StreamRegistry};
pub use relation_sink::RelationSink;
