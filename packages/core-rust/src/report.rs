//! Results of a consistency audit between the hot and durable stores.

use std::fmt;

use serde::Serialize;

use crate::types::{DataClass, EntityId};

/// Outcome of auditing one entity of one data class.
///
/// Produced fresh on every pass and only ever logged, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub data_type: DataClass,
    pub entity_id: EntityId,
    /// Set cardinality or counter value observed in the hot store.
    pub hot_count: i64,
    /// Row count or aggregate observed in the durable store.
    pub cold_count: i64,
    /// `hot_count - cold_count`.
    pub diff: i64,
    /// Members present in the hot set but absent from durable rows.
    pub missing_in_cold: usize,
    /// Durable rows with no hot-store counterpart.
    pub missing_in_hot: usize,
    /// Whether a corrective write was applied during this pass.
    pub fixed: bool,
}

impl ConsistencyReport {
    #[must_use]
    pub fn new(data_type: DataClass, entity_id: EntityId, hot_count: i64, cold_count: i64) -> Self {
        Self {
            data_type,
            entity_id,
            hot_count,
            cold_count,
            diff: hot_count - cold_count,
            missing_in_cold: 0,
            missing_in_hot: 0,
            fixed: false,
        }
    }

    /// Two sets can have equal cardinality and still differ, so the member
    /// differences are checked as well as the scalar one.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.diff == 0 && self.missing_in_cold == 0 && self.missing_in_hot == 0
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}: hot={} cold={} diff={} (+{}/-{}) fixed={}",
            self.data_type,
            self.entity_id,
            self.hot_count,
            self.cold_count,
            self.diff,
            self.missing_in_cold,
            self.missing_in_hot,
            self.fixed
        )
    }
}

/// Aggregate of one reconciliation page.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    /// `None` when no data class was enabled.
    pub data_type: Option<DataClass>,
    /// Offset of the page within the distinct-id listing.
    pub offset: usize,
    pub audited: usize,
    pub inconsistent: usize,
    pub fixed: usize,
    /// Entities whose comparison or repair failed.
    pub failures: usize,
    /// `true` when the listing was exhausted and the offset wrapped to 0.
    pub cycle_completed: bool,
    pub reports: Vec<ConsistencyReport>,
}
