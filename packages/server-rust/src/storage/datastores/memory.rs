//! In-memory [`DurableStore`] implementation.
//!
//! [`MemoryDurableStore`] keeps relation edges, comment counts and archived
//! records in ordered collections so paging is deterministic. Besides
//! embedding, it is the store every engine test runs against; the fault
//! toggles below let tests exercise the compensation paths.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use chrono::NaiveDate;
use hotsync_core::{
    AggregateKind, ArchiveRecord, BrowseRecord, DataClass, EdgeKey, EntityId, RelationKind,
    UvRecord, WindowStatRecord,
};
use parking_lot::RwLock;

use crate::storage::durable_store::DurableStore;

#[derive(Debug, Default)]
struct Tables {
    relations: HashMap<RelationKind, BTreeSet<EdgeKey>>,
    comment_counts: BTreeMap<EntityId, i64>,
    browse: BTreeSet<BrowseRecord>,
    uv: BTreeSet<UvRecord>,
    window_stats: BTreeSet<WindowStatRecord>,
}

impl Tables {
    fn aggregate_counts(&self, kind: AggregateKind) -> BTreeMap<EntityId, i64> {
        let mut counts = BTreeMap::new();
        match kind {
            AggregateKind::LikeCount => {
                for edge in self.edges(RelationKind::Like) {
                    *counts.entry(edge.subject).or_insert(0) += 1;
                }
            }
            AggregateKind::FavoriteCount => {
                for edge in self.edges(RelationKind::Favorite) {
                    *counts.entry(edge.object).or_insert(0) += 1;
                }
            }
            AggregateKind::CommentCount => {
                counts.extend(self.comment_counts.iter().filter(|(_, n)| **n != 0));
            }
        }
        counts
    }

    fn edges(&self, kind: RelationKind) -> impl Iterator<Item = &EdgeKey> {
        self.relations.get(&kind).into_iter().flatten()
    }
}

/// Process-local durable store.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
    fail_after: RwLock<Option<usize>>,
    unreadable: RwLock<HashSet<EntityId>>,
    write_calls: AtomicUsize,
}

impl MemoryDurableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lets the next `calls` writes through and fails every write after them.
    pub fn fail_writes_after(&self, calls: usize) {
        *self.fail_after.write() = Some(self.write_calls() + calls);
    }

    /// Makes reads concerning `entity` fail.
    pub fn fail_reads_for(&self, entity: EntityId) {
        self.unreadable.write().insert(entity);
    }

    /// Number of write calls received, including failed ones.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Inserts edges directly, bypassing fault injection and call counting.
    pub fn seed_relations(&self, kind: RelationKind, edges: impl IntoIterator<Item = EdgeKey>) {
        self.tables
            .write()
            .relations
            .entry(kind)
            .or_default()
            .extend(edges);
    }

    pub fn set_comment_count(&self, post: EntityId, count: i64) {
        self.tables.write().comment_counts.insert(post, count);
    }

    #[must_use]
    pub fn relation_edges(&self, kind: RelationKind) -> Vec<EdgeKey> {
        self.tables.read().edges(kind).copied().collect()
    }

    #[must_use]
    pub fn archived_browse(&self) -> Vec<BrowseRecord> {
        self.tables.read().browse.iter().cloned().collect()
    }

    #[must_use]
    pub fn archived_uv(&self) -> Vec<UvRecord> {
        self.tables.read().uv.iter().cloned().collect()
    }

    #[must_use]
    pub fn archived_window_stats(&self) -> Vec<WindowStatRecord> {
        self.tables.read().window_stats.iter().cloned().collect()
    }

    fn begin_write(&self) -> anyhow::Result<()> {
        let call = self.write_calls.fetch_add(1, Ordering::SeqCst);
        let exhausted = self.fail_after.read().is_some_and(|limit| call >= limit);
        if exhausted || self.fail_writes.load(Ordering::SeqCst) {
            bail!("durable store unavailable");
        }
        Ok(())
    }

    fn check_readable(&self, entity: EntityId) -> anyhow::Result<()> {
        if self.unreadable.read().contains(&entity) {
            bail!("read of entity {entity} failed");
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn relation_members(
        &self,
        kind: RelationKind,
        subject: EntityId,
    ) -> anyhow::Result<HashSet<EntityId>> {
        self.check_readable(subject)?;
        Ok(self
            .tables
            .read()
            .edges(kind)
            .filter(|e| e.subject == subject)
            .map(|e| e.object)
            .collect())
    }

    async fn relation_exists(
        &self,
        kind: RelationKind,
        edges: &[EdgeKey],
    ) -> anyhow::Result<HashSet<EdgeKey>> {
        let tables = self.tables.read();
        let Some(existing) = tables.relations.get(&kind) else {
            return Ok(HashSet::new());
        };
        Ok(edges
            .iter()
            .filter(|e| existing.contains(*e))
            .copied()
            .collect())
    }

    async fn insert_relations(&self, kind: RelationKind, edges: &[EdgeKey]) -> anyhow::Result<u64> {
        self.begin_write()?;
        let mut tables = self.tables.write();
        let set = tables.relations.entry(kind).or_default();
        Ok(edges.iter().filter(|e| set.insert(**e)).count() as u64)
    }

    async fn delete_relations(&self, kind: RelationKind, edges: &[EdgeKey]) -> anyhow::Result<u64> {
        self.begin_write()?;
        let mut tables = self.tables.write();
        let Some(set) = tables.relations.get_mut(&kind) else {
            return Ok(0);
        };
        Ok(edges.iter().filter(|e| set.remove(*e)).count() as u64)
    }

    async fn distinct_owner_ids(
        &self,
        class: DataClass,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<EntityId>> {
        let tables = self.tables.read();
        let ids: BTreeSet<EntityId> = match class {
            DataClass::Relation(kind) => tables.edges(kind).map(|e| e.subject).collect(),
            DataClass::Aggregate(kind) => tables.aggregate_counts(kind).into_keys().collect(),
        };
        Ok(ids.into_iter().skip(offset).take(limit).collect())
    }

    async fn aggregate_count(&self, kind: AggregateKind, entity: EntityId) -> anyhow::Result<i64> {
        self.check_readable(entity)?;
        Ok(self
            .tables
            .read()
            .aggregate_counts(kind)
            .get(&entity)
            .copied()
            .unwrap_or(0))
    }

    async fn aggregate_counts(&self, kind: AggregateKind) -> anyhow::Result<Vec<(EntityId, i64)>> {
        Ok(self.tables.read().aggregate_counts(kind).into_iter().collect())
    }

    async fn upsert_archived(&self, records: &[ArchiveRecord]) -> anyhow::Result<u64> {
        self.begin_write()?;
        let mut tables = self.tables.write();
        let mut added = 0;
        for record in records {
            let inserted = match record {
                ArchiveRecord::Browse(r) => tables.browse.insert(r.clone()),
                ArchiveRecord::Uv(r) => tables.uv.insert(r.clone()),
                ArchiveRecord::WindowStat(r) => tables.window_stats.insert(r.clone()),
            };
            if inserted {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn browse_history(
        &self,
        user: EntityId,
        from: i64,
        to: i64,
    ) -> anyhow::Result<Vec<BrowseRecord>> {
        Ok(self
            .tables
            .read()
            .browse
            .iter()
            .filter(|r| r.user_id == user && (from..=to).contains(&r.browse_time))
            .cloned()
            .collect())
    }

    async fn window_stats(
        &self,
        metric: &str,
        from: i64,
        to: i64,
    ) -> anyhow::Result<Vec<WindowStatRecord>> {
        Ok(self
            .tables
            .read()
            .window_stats
            .iter()
            .filter(|r| r.metric == metric && (from..=to).contains(&r.timestamp))
            .cloned()
            .collect())
    }

    async fn uv_visitors(
        &self,
        resource_type: &str,
        resource_id: EntityId,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<UvRecord>> {
        Ok(self
            .tables
            .read()
            .uv
            .iter()
            .filter(|r| {
                r.resource_type == resource_type && r.resource_id == resource_id && r.date == date
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges(pairs: &[(u64, u64)]) -> Vec<EdgeKey> {
        pairs.iter().map(|(s, o)| EdgeKey::new(*s, *o)).collect()
    }

    #[tokio::test]
    async fn relation_writes_are_idempotent() {
        let store = MemoryDurableStore::new();
        let batch = edges(&[(1, 10), (1, 11)]);
        assert_eq!(store.insert_relations(RelationKind::Like, &batch).await.unwrap(), 2);
        assert_eq!(store.insert_relations(RelationKind::Like, &batch).await.unwrap(), 0);
        assert_eq!(
            store.delete_relations(RelationKind::Like, &batch[..1]).await.unwrap(),
            1
        );
        assert_eq!(
            store.delete_relations(RelationKind::Like, &batch[..1]).await.unwrap(),
            0
        );
        assert_eq!(
            store.relation_members(RelationKind::Like, 1).await.unwrap(),
            HashSet::from([11])
        );
    }

    #[tokio::test]
    async fn relation_exists_reports_subset() {
        let store = MemoryDurableStore::new();
        store.seed_relations(RelationKind::Favorite, edges(&[(5, 50)]));
        let found = store
            .relation_exists(RelationKind::Favorite, &edges(&[(5, 50), (5, 51)]))
            .await
            .unwrap();
        assert_eq!(found, HashSet::from([EdgeKey::new(5, 50)]));
    }

    #[tokio::test]
    async fn distinct_owner_ids_pages_in_order() {
        let store = MemoryDurableStore::new();
        store.seed_relations(RelationKind::Follow, edges(&[(3, 1), (1, 2), (2, 3), (1, 4)]));
        let class = DataClass::Relation(RelationKind::Follow);
        assert_eq!(store.distinct_owner_ids(class, 0, 2).await.unwrap(), vec![1, 2]);
        assert_eq!(store.distinct_owner_ids(class, 2, 2).await.unwrap(), vec![3]);
        assert!(store.distinct_owner_ids(class, 3, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aggregates_are_recomputed_from_rows() {
        let store = MemoryDurableStore::new();
        store.seed_relations(RelationKind::Like, edges(&[(100, 1), (100, 2), (200, 1)]));
        store.seed_relations(RelationKind::Favorite, edges(&[(1, 100), (2, 100), (3, 200)]));
        store.set_comment_count(100, 7);
        store.set_comment_count(300, 0);

        assert_eq!(store.aggregate_count(AggregateKind::LikeCount, 100).await.unwrap(), 2);
        assert_eq!(
            store.aggregate_count(AggregateKind::FavoriteCount, 200).await.unwrap(),
            1
        );
        assert_eq!(
            store.aggregate_counts(AggregateKind::CommentCount).await.unwrap(),
            vec![(100, 7)]
        );
        assert_eq!(
            store
                .distinct_owner_ids(DataClass::Aggregate(AggregateKind::FavoriteCount), 0, 10)
                .await
                .unwrap(),
            vec![100, 200]
        );
    }

    #[tokio::test]
    async fn upsert_archived_dedups_by_identity() {
        let store = MemoryDurableStore::new();
        let record = ArchiveRecord::from(BrowseRecord {
            user_id: 1,
            post_id: 2,
            browse_time: 1_000,
        });
        assert_eq!(store.upsert_archived(&[record.clone()]).await.unwrap(), 1);
        assert_eq!(store.upsert_archived(&[record]).await.unwrap(), 0);
        assert_eq!(store.browse_history(1, 0, 2_000).await.unwrap().len(), 1);
        assert!(store.browse_history(1, 1_001, 2_000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fault_toggles_fail_writes_and_reads() {
        let store = MemoryDurableStore::new();
        store.set_fail_writes(true);
        assert!(store
            .insert_relations(RelationKind::Like, &edges(&[(1, 1)]))
            .await
            .is_err());
        assert_eq!(store.write_calls(), 1);
        store.set_fail_writes(false);
        assert!(store
            .insert_relations(RelationKind::Like, &edges(&[(1, 1)]))
            .await
            .is_ok());

        store.fail_writes_after(1);
        let batch = edges(&[(2, 2)]);
        assert!(store.insert_relations(RelationKind::Like, &batch).await.is_ok());
        assert!(store.delete_relations(RelationKind::Like, &batch).await.is_err());

        store.fail_reads_for(1);
        assert!(store.relation_members(RelationKind::Like, 1).await.is_err());
        assert!(store.relation_members(RelationKind::Like, 2).await.is_ok());
    }
}
