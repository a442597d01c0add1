//! Relational store holding the durable, queryable copy of the hot data.
//!
//! Defines [`DurableStore`]. The engine never issues query text; everything
//! it needs from the database goes through these methods, which map onto the
//! batch insert/delete and paging queries of the persistence layer.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use hotsync_core::{
    AggregateKind, ArchiveRecord, BrowseRecord, DataClass, EdgeKey, EntityId, RelationKind,
    UvRecord, WindowStatRecord,
};

/// Durable persistence backend.
///
/// Writes must be idempotent: inserting an existing relation edge, deleting a
/// missing one, or upserting an already archived record are all no-ops. The
/// write-behind and archive paths rely on this for at-least-once delivery.
///
/// Used as `Arc<dyn DurableStore>`.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Objects related to `subject` (post likers, a user's favorites, ...).
    async fn relation_members(
        &self,
        kind: RelationKind,
        subject: EntityId,
    ) -> anyhow::Result<HashSet<EntityId>>;

    /// Subset of `edges` that already exist.
    async fn relation_exists(
        &self,
        kind: RelationKind,
        edges: &[EdgeKey],
    ) -> anyhow::Result<HashSet<EdgeKey>>;

    /// Inserts edges. Returns the number of rows actually added.
    async fn insert_relations(&self, kind: RelationKind, edges: &[EdgeKey]) -> anyhow::Result<u64>;

    /// Deletes edges. Returns the number of rows actually removed.
    async fn delete_relations(&self, kind: RelationKind, edges: &[EdgeKey]) -> anyhow::Result<u64>;

    /// Page of distinct entity ids that own data of `class`, ascending.
    ///
    /// For relation classes these are subjects; for aggregate classes, the
    /// entities (posts) that carry a non-zero aggregate.
    async fn distinct_owner_ids(
        &self,
        class: DataClass,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<EntityId>>;

    /// Aggregate of `kind` for one entity, recomputed from durable rows.
    async fn aggregate_count(&self, kind: AggregateKind, entity: EntityId) -> anyhow::Result<i64>;

    /// Every entity with a non-zero aggregate of `kind`, ascending by id.
    async fn aggregate_counts(&self, kind: AggregateKind) -> anyhow::Result<Vec<(EntityId, i64)>>;

    /// Idempotently stores archived records. Returns the number newly stored.
    async fn upsert_archived(&self, records: &[ArchiveRecord]) -> anyhow::Result<u64>;

    /// Archived browse records of `user` with `from <= browse_time <= to`.
    async fn browse_history(
        &self,
        user: EntityId,
        from: i64,
        to: i64,
    ) -> anyhow::Result<Vec<BrowseRecord>>;

    /// Archived observations of `metric` with `from <= timestamp <= to`.
    async fn window_stats(
        &self,
        metric: &str,
        from: i64,
        to: i64,
    ) -> anyhow::Result<Vec<WindowStatRecord>>;

    /// Archived unique visitors of one resource on one day.
    async fn uv_visitors(
        &self,
        resource_type: &str,
        resource_id: EntityId,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<UvRecord>>;
}
