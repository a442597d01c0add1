//! `hotsync` core: relation keys, data classes, archive records, consistency
//! reports, and the hot-store key layout shared by every layer.

pub mod keys;
pub mod records;
pub mod report;
pub mod time;
pub mod types;

pub use records::{ArchiveRecord, BrowseRecord, UvRecord, WindowStatRecord};
pub use report::{ConsistencyReport, ReconcileSummary};
pub use types::{AggregateKind, Authority, DataClass, EdgeKey, EntityId, RelationKind};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
