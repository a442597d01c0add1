//! Time-window archiving of aged hot data.
//!
//! - [`ArchiveSource`]: one family of hot keys and its retention
//! - [`Archiver`]: scan, collect, write, evict loop over all sources
//! - [`ArchiveRunnable`]: periodic execution on a background worker

pub mod archiver;
pub mod source;
pub mod sources;
pub mod task;

pub use archiver::{ArchiveReport, Archiver};
pub use source::ArchiveSource;
pub use sources::{BrowseHistorySource, UvSource, WindowStatsSource};
pub use task::{ArchiveRunnable, ArchiveTask};
