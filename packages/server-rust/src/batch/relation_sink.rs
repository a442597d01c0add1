//! Flush callback for relation streams (likes, favorites, follows, blocks).
//!
//! A generation maps each edge to its latest state: `true` means the relation
//! exists, `false` that it was removed. [`RelationSink`] turns that into batch
//! inserts and deletes against the [`DurableStore`], skipping inserts of rows
//! that already exist.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use hotsync_core::{EdgeKey, RelationKind};
use tracing::debug;

use super::manager::BatchWriter;
use crate::storage::DurableStore;

/// Rows per insert/delete call.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Writes relation generations to the durable store.
pub struct RelationSink {
    kind: RelationKind,
    durable: Arc<dyn DurableStore>,
    chunk_size: usize,
}

impl RelationSink {
    #[must_use]
    pub fn new(kind: RelationKind, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            kind,
            durable,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Overrides the rows-per-call limit. Zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn kind(&self) -> RelationKind {
        self.kind
    }
}

#[async_trait]
impl BatchWriter<EdgeKey, bool> for RelationSink {
    async fn write_batch(&self, batch: &HashMap<EdgeKey, bool>) -> anyhow::Result<()> {
        let (mut inserts, mut deletes): (Vec<EdgeKey>, Vec<EdgeKey>) = (Vec::new(), Vec::new());
        for (edge, present) in batch {
            if *present {
                inserts.push(*edge);
            } else {
                deletes.push(*edge);
            }
        }
        inserts.sort_unstable();
        deletes.sort_unstable();

        let existing = if inserts.is_empty() {
            HashSet::new()
        } else {
            self.durable.relation_exists(self.kind, &inserts).await?
        };
        let skipped = existing.len();
        inserts.retain(|edge| !existing.contains(edge));

        let mut inserted = 0;
        for chunk in inserts.chunks(self.chunk_size) {
            inserted += self.durable.insert_relations(self.kind, chunk).await?;
        }
        let mut deleted = 0;
        for chunk in deletes.chunks(self.chunk_size) {
            deleted += self.durable.delete_relations(self.kind, chunk).await?;
        }

        debug!(
            kind = self.kind.as_str(),
            inserted, deleted, skipped, "relation generation persisted"
        );
        Ok(())
    }
}
