//! Metric records moved from the hot store into cold storage by the archiver.
//!
//! Records are immutable once archived. Each type derives `Ord` over its
//! natural identity so durable stores can upsert idempotently.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// One post view in a user's browse history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseRecord {
    pub user_id: EntityId,
    pub post_id: EntityId,
    /// Millis since epoch.
    pub browse_time: i64,
}

/// One unique visitor of a resource on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UvRecord {
    pub resource_type: String,
    pub resource_id: EntityId,
    pub date: NaiveDate,
    pub visitor_id: String,
}

/// One observation of a time-windowed metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStatRecord {
    /// Full metric name, including any dynamic suffix.
    pub metric: String,
    pub value: String,
    /// Millis since epoch.
    pub timestamp: i64,
}

/// Any record the archiver can hand to the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ArchiveRecord {
    Browse(BrowseRecord),
    Uv(UvRecord),
    WindowStat(WindowStatRecord),
}

impl From<BrowseRecord> for ArchiveRecord {
    fn from(record: BrowseRecord) -> Self {
        Self::Browse(record)
    }
}

impl From<UvRecord> for ArchiveRecord {
    fn from(record: UvRecord) -> Self {
        Self::Uv(record)
    }
}

impl From<WindowStatRecord> for ArchiveRecord {
    fn from(record: WindowStatRecord) -> Self {
        Self::WindowStat(record)
    }
}
