//! hotsync engine: write-behind batching, cache-aside loading, time-window
//! archiving and hot/durable consistency reconciliation.

pub mod archive;
pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use archive::{ArchiveReport, ArchiveSource, ArchiveTask, Archiver};
pub use batch::{BatchTaskManager, BatchWriter, FlushReason, FnWriter, RelationSink, StreamRegistry};
pub use cache::{with_cache_aside, CacheAside, FnLoader, SourceLoader};
pub use config::EngineConfig;
pub use engine::{EngineState, SyncEngine};
pub use error::{BatchError, ConfigError, EngineError};
pub use reconcile::{ReconcileTask, Reconciler};
pub use storage::{DurableStore, HotStore, MemoryDurableStore, MemoryHotStore};
