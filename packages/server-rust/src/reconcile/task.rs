//! Scheduled reconciliation on a [`BackgroundWorker`](crate::worker::BackgroundWorker).

use std::sync::Arc;

use async_trait::async_trait;
use hotsync_core::{AggregateKind, DataClass, EntityId};
use tracing::{info, warn};

use super::reconciler::Reconciler;
use crate::worker::BackgroundRunnable;

/// On-demand reconciliation requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileTask {
    /// Audit the next page in the class rotation.
    RunNext,
    /// Audit one entity of one class.
    RunEntity { class: DataClass, entity: EntityId },
    /// Rewrite a hot ranking from the durable aggregates.
    SyncRanking { kind: AggregateKind },
}

/// Audits one page per tick and serves on-demand requests.
pub struct ReconcileRunnable {
    reconciler: Arc<Reconciler>,
}

impl ReconcileRunnable {
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl BackgroundRunnable for ReconcileRunnable {
    type Task = ReconcileTask;

    async fn run(&mut self, task: ReconcileTask) {
        match task {
            ReconcileTask::RunNext => {
                self.reconciler.run_next().await;
            }
            ReconcileTask::RunEntity { class, entity } => {
                match self.reconciler.reconcile_entity(class, entity).await {
                    Ok(report) => info!(%report, "on-demand audit finished"),
                    Err(err) => warn!(class = %class, entity, error = %err, "on-demand audit failed"),
                }
            }
            ReconcileTask::SyncRanking { kind } => {
                if let Err(err) = self.reconciler.sync_ranking(kind).await {
                    warn!(ranking = kind.ranking_key(), error = %err, "ranking sync failed");
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        self.reconciler.run_next().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hotsync_core::{EdgeKey, RelationKind};

    use super::*;
    use crate::config::ReconcileConfig;
    use crate::storage::{HotStore, MemoryDurableStore, MemoryHotStore};
    use crate::worker::BackgroundWorker;

    #[tokio::test(start_paused = true)]
    async fn tick_repairs_drift() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        durable.seed_relations(RelationKind::Follow, [EdgeKey::new(1, 2)]);
        let config = ReconcileConfig {
            classes: vec![DataClass::Relation(RelationKind::Follow)],
            ..ReconcileConfig::default()
        };
        let reconciler = Arc::new(Reconciler::new(hot.clone(), durable.clone(), config));

        let mut worker = BackgroundWorker::start(
            "reconcile",
            ReconcileRunnable::new(reconciler),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        worker.stop().await;

        assert!(durable.relation_edges(RelationKind::Follow).is_empty());
        assert!(!hot.exists("user:follow:1").await.unwrap());
    }

    #[tokio::test]
    async fn sync_ranking_task_updates_hot_scores() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        durable.set_comment_count(3, 4);
        let reconciler = Arc::new(Reconciler::new(
            hot.clone(),
            durable,
            ReconcileConfig::default(),
        ));
        let mut runnable = ReconcileRunnable::new(reconciler);

        runnable
            .run(ReconcileTask::SyncRanking {
                kind: AggregateKind::CommentCount,
            })
            .await;
        assert_eq!(
            hot.zscore(AggregateKind::CommentCount.ranking_key(), "3")
                .await
                .unwrap(),
            Some(4.0)
        );
    }
}
