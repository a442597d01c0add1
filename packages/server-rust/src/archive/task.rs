//! Scheduled archiving on a [`BackgroundWorker`](crate::worker::BackgroundWorker).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::archiver::Archiver;
use crate::worker::BackgroundRunnable;

/// On-demand archive requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTask {
    /// Archive every source.
    RunAll,
    /// Archive one source by name.
    RunSource { name: String },
}

/// Runs the archiver on every tick and on request.
pub struct ArchiveRunnable {
    archiver: Arc<Archiver>,
}

impl ArchiveRunnable {
    #[must_use]
    pub fn new(archiver: Arc<Archiver>) -> Self {
        Self { archiver }
    }
}

#[async_trait]
impl BackgroundRunnable for ArchiveRunnable {
    type Task = ArchiveTask;

    async fn run(&mut self, task: ArchiveTask) {
        match task {
            ArchiveTask::RunAll => {
                self.archiver.run_all().await;
            }
            ArchiveTask::RunSource { name } => {
                let now = hotsync_core::time::now_millis();
                if self.archiver.run_source_named(&name, now).await.is_none() {
                    warn!(source = %name, "archive requested for unknown source");
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        self.archiver.run_all().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hotsync_core::keys::browse_history_key;
    use hotsync_core::time::{now_millis, MILLIS_PER_DAY};

    use super::*;
    use crate::config::ArchiveConfig;
    use crate::storage::{HotStore, MemoryDurableStore, MemoryHotStore};
    use crate::worker::BackgroundWorker;

    #[allow(clippy::cast_precision_loss)]
    #[tokio::test]
    async fn submitted_task_archives_due_data() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let key = browse_history_key(3);
        hot.zadd(&key, "30", (now_millis() - 10 * MILLIS_PER_DAY) as f64)
            .await
            .unwrap();

        let archiver = Arc::new(Archiver::new(
            hot.clone(),
            durable.clone(),
            &ArchiveConfig::default(),
        ));
        let mut worker = BackgroundWorker::start(
            "archive",
            ArchiveRunnable::new(archiver),
            Duration::from_secs(3600),
        );
        worker
            .submit(ArchiveTask::RunSource {
                name: "browse_history".into(),
            })
            .await
            .unwrap();
        worker.submit(ArchiveTask::RunAll).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while hot.exists(&key).await.unwrap() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        worker.stop().await;
        assert_eq!(durable.archived_browse().len(), 1);
    }
}
