//! Process-wide coordinator.
//!
//! [`SyncEngine`] owns the write-behind stream registry, the archiver and the
//! reconciler together with the background workers that schedule them. It is
//! built explicitly, started once, and shut down explicitly; shutdown drains
//! every stream with a final flush.

use std::sync::Arc;

use arc_swap::ArcSwap;
use hotsync_core::{EdgeKey, ReconcileSummary, RelationKind};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{error, info};

use crate::archive::{ArchiveReport, ArchiveRunnable, ArchiveTask, Archiver};
use crate::batch::{
    BatchTaskManager, BatchWriter, OperationKey, OperationValue, RelationSink, StreamRegistry,
};
use crate::cache::{CacheAside, CacheValue, SourceLoader};
use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError};
use crate::reconcile::{ReconcileRunnable, ReconcileTask, Reconciler};
use crate::storage::{DurableStore, HotStore};
use crate::worker::BackgroundWorker;

/// Engine lifecycle.
///
/// State machine: Starting -> Running -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built; streams can be registered, workers are not running yet.
    Starting,
    /// Workers are scheduled.
    Running,
    /// Shutdown in progress; stream lookups are refused.
    Draining,
    /// Every stream has been drained.
    Stopped,
}

/// Coordinator of write-behind streams and maintenance workers.
pub struct SyncEngine {
    config: EngineConfig,
    hot: Arc<dyn HotStore>,
    durable: Arc<dyn DurableStore>,
    streams: StreamRegistry,
    archiver: Arc<Archiver>,
    reconciler: Arc<Reconciler>,
    archive_worker: Mutex<Option<BackgroundWorker<ArchiveRunnable>>>,
    reconcile_worker: Mutex<Option<BackgroundWorker<ReconcileRunnable>>>,
    state: ArcSwap<EngineState>,
}

impl SyncEngine {
    /// Validates `config` and builds an engine in the `Starting` state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for invalid configuration.
    pub fn new(
        config: EngineConfig,
        hot: Arc<dyn HotStore>,
        durable: Arc<dyn DurableStore>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let archiver = Arc::new(Archiver::new(hot.clone(), durable.clone(), &config.archive));
        let reconciler = Arc::new(Reconciler::new(
            hot.clone(),
            durable.clone(),
            config.reconcile.clone(),
        ));
        Ok(Self {
            config,
            hot,
            durable,
            streams: StreamRegistry::new(),
            archiver,
            reconciler,
            archive_worker: Mutex::new(None),
            reconcile_worker: Mutex::new(None),
            state: ArcSwap::from_pointee(EngineState::Starting),
        })
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        **self.state.load()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    #[must_use]
    pub fn archiver(&self) -> &Arc<Archiver> {
        &self.archiver
    }

    #[must_use]
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    fn ensure_accepting(&self) -> Result<(), EngineError> {
        match self.state() {
            EngineState::Starting | EngineState::Running => Ok(()),
            EngineState::Draining | EngineState::Stopped => Err(EngineError::ShuttingDown),
        }
    }

    /// Registers a write-behind stream flushed through `writer`, configured
    /// from the matching `streams` entry or the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`], [`EngineError::DuplicateStream`],
    /// or a [`ConfigError`] from building the manager.
    pub fn register_stream<K: OperationKey, V: OperationValue>(
        &self,
        name: &str,
        writer: impl BatchWriter<K, V>,
    ) -> Result<BatchTaskManager<K, V>, EngineError> {
        self.ensure_accepting()?;
        let manager = BatchTaskManager::new(self.config.stream(name), writer)?;
        self.streams.register(manager.clone())?;
        info!(stream = name, "stream registered");
        Ok(manager)
    }

    /// Registers a relation stream of `kind` that writes edges to the durable
    /// store: `true` inserts an edge, `false` deletes it.
    ///
    /// # Errors
    ///
    /// See [`register_stream`](Self::register_stream).
    pub fn register_relation_stream(
        &self,
        name: &str,
        kind: RelationKind,
    ) -> Result<BatchTaskManager<EdgeKey, bool>, EngineError> {
        self.register_stream(name, RelationSink::new(kind, self.durable.clone()))
    }

    /// Looks up a registered stream with its concrete types.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] once shutdown has begun, or the
    /// registry's lookup error.
    pub fn stream<K: OperationKey, V: OperationValue>(
        &self,
        name: &str,
    ) -> Result<BatchTaskManager<K, V>, EngineError> {
        self.ensure_accepting()?;
        self.streams.get(name)
    }

    /// Cache-aside loader over the engine's hot store using the configured
    /// TTLs.
    pub fn cache_aside<V: CacheValue, L: SourceLoader<V>>(
        &self,
        prefix: impl Into<String>,
        loader: L,
    ) -> CacheAside<V, L> {
        CacheAside::from_config(self.hot.clone(), prefix, &self.config.cache, loader)
    }

    /// Starts the archive and reconcile workers (those enabled) and moves to
    /// `Running`. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] after shutdown, or
    /// [`ConfigError::NoRuntime`] outside a tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        match self.state() {
            EngineState::Starting => {}
            EngineState::Running => return Ok(()),
            EngineState::Draining | EngineState::Stopped => return Err(EngineError::ShuttingDown),
        }
        Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        if self.config.archive.enabled {
            *self.archive_worker.lock() = Some(BackgroundWorker::start(
                "archive",
                ArchiveRunnable::new(self.archiver.clone()),
                self.config.archive.interval(),
            ));
        }
        if self.config.reconcile.enabled {
            *self.reconcile_worker.lock() = Some(BackgroundWorker::start(
                "reconcile",
                ReconcileRunnable::new(self.reconciler.clone()),
                self.config.reconcile.interval(),
            ));
        }
        self.state.store(Arc::new(EngineState::Running));
        info!(
            streams = self.streams.len(),
            archive = self.config.archive.enabled,
            reconcile = self.config.reconcile.enabled,
            "engine started"
        );
        Ok(())
    }

    /// Runs the archiver over every source now and waits for it.
    pub async fn archive_now(&self) -> Vec<ArchiveReport> {
        self.archiver.run_all().await
    }

    /// Audits the next reconciliation page now and waits for it.
    pub async fn reconcile_now(&self) -> ReconcileSummary {
        self.reconciler.run_next().await
    }

    /// Queues an archive task on the background worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is not running or its queue is full.
    pub fn submit_archive(&self, task: ArchiveTask) -> anyhow::Result<()> {
        match &*self.archive_worker.lock() {
            Some(worker) => worker.try_submit(task),
            None => Err(anyhow::anyhow!("archive worker not running")),
        }
    }

    /// Queues a reconcile task on the background worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is not running or its queue is full.
    pub fn submit_reconcile(&self, task: ReconcileTask) -> anyhow::Result<()> {
        match &*self.reconcile_worker.lock() {
            Some(worker) => worker.try_submit(task),
            None => Err(anyhow::anyhow!("reconcile worker not running")),
        }
    }

    /// Stops the workers, then drains every stream with a final flush.
    ///
    /// Returns the number of operations written by the drain. Calling it
    /// again after it has begun is a no-op returning 0.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DrainFailed`] with the failure of every stream
    /// whose final write failed; those operations remain buffered.
    pub async fn shutdown(&self) -> Result<usize, EngineError> {
        let previous = self.state.rcu(|current| match **current {
            EngineState::Draining | EngineState::Stopped => Arc::clone(current),
            EngineState::Starting | EngineState::Running => Arc::new(EngineState::Draining),
        });
        if matches!(*previous, EngineState::Draining | EngineState::Stopped) {
            return Ok(0);
        }
        info!(pending = self.streams.pending_total(), "engine draining");

        let archive_worker = self.archive_worker.lock().take();
        if let Some(mut worker) = archive_worker {
            worker.stop().await;
        }
        let reconcile_worker = self.reconcile_worker.lock().take();
        if let Some(mut worker) = reconcile_worker {
            worker.stop().await;
        }

        let mut drained = 0;
        let mut failures = Vec::new();
        for (name, result) in self.streams.drain_all().await {
            match result {
                Ok(written) => drained += written,
                Err(err) => {
                    error!(stream = %name, error = %err, "stream failed to drain");
                    failures.push(err);
                }
            }
        }

        self.state.store(Arc::new(EngineState::Stopped));
        info!(drained, failed = failures.len(), "engine stopped");
        if failures.is_empty() {
            Ok(drained)
        } else {
            Err(EngineError::DrainFailed(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::batch::FnWriter;
    use crate::cache::FnLoader;
    use crate::config::StreamConfig;
    use crate::storage::{MemoryDurableStore, MemoryHotStore};

    fn engine(config: EngineConfig) -> (SyncEngine, Arc<MemoryHotStore>, Arc<MemoryDurableStore>) {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let engine = SyncEngine::new(config, hot.clone(), durable.clone()).unwrap();
        (engine, hot, durable)
    }

    fn noop_writer() -> impl BatchWriter<String, i64> {
        FnWriter::new(|_batch: HashMap<String, i64>| async { Ok::<(), anyhow::Error>(()) })
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.streams.push(StreamConfig {
            size_threshold: 0,
            ..StreamConfig::named("likes")
        });
        let result = SyncEngine::new(
            config,
            Arc::new(MemoryHotStore::new()),
            Arc::new(MemoryDurableStore::new()),
        );
        assert!(matches!(
            result,
            Err(EngineError::Config(ConfigError::ZeroThreshold { .. }))
        ));
    }

    #[tokio::test]
    async fn streams_are_looked_up_by_name_and_type() {
        let (engine, _, _) = engine(EngineConfig::default());
        engine.register_stream("scores", noop_writer()).unwrap();

        assert!(engine.stream::<String, i64>("scores").is_ok());
        assert!(matches!(
            engine.stream::<String, bool>("scores"),
            Err(EngineError::StreamTypeMismatch(_))
        ));
        assert!(matches!(
            engine.stream::<String, i64>("missing"),
            Err(EngineError::UnknownStream(_))
        ));
        assert!(matches!(
            engine.register_stream("scores", noop_writer()),
            Err(EngineError::DuplicateStream(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_drains_relation_streams() {
        let (engine, _, durable) = engine(EngineConfig::default());
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        let likes = engine
            .register_relation_stream("likes", RelationKind::Like)
            .unwrap();
        likes.add_operation(EdgeKey::new(1, 10), true);
        likes.add_operation(EdgeKey::new(1, 11), true);

        assert_eq!(engine.shutdown().await.unwrap(), 2);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(durable.relation_edges(RelationKind::Like).len(), 2);

        assert!(matches!(
            engine.stream::<EdgeKey, bool>("likes"),
            Err(EngineError::ShuttingDown)
        ));
        assert!(matches!(engine.start(), Err(EngineError::ShuttingDown)));
        assert_eq!(engine.shutdown().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_shutdowns_drain_once() {
        let (engine, _, durable) = engine(EngineConfig::default());
        let engine = Arc::new(engine);
        let likes = engine
            .register_relation_stream("likes", RelationKind::Like)
            .unwrap();
        likes.add_operation(EdgeKey::new(4, 40), true);

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.shutdown().await.unwrap() })
            })
            .collect();
        let mut drained = Vec::new();
        for caller in callers {
            drained.push(caller.await.unwrap());
        }
        drained.sort_unstable();
        assert_eq!(drained, vec![0, 0, 0, 1]);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(durable.relation_edges(RelationKind::Like).len(), 1);
    }

    #[tokio::test]
    async fn failed_drain_is_reported() {
        let (engine, _, durable) = engine(EngineConfig::default());
        let follows = engine
            .register_relation_stream("follows", RelationKind::Follow)
            .unwrap();
        follows.add_operation(EdgeKey::new(2, 3), true);
        durable.set_fail_writes(true);

        match engine.shutdown().await {
            Err(EngineError::DrainFailed(failures)) => assert_eq!(failures.len(), 1),
            other => panic!("expected drain failure, got {other:?}"),
        }
        assert_eq!(follows.pending_len(), 1);
    }

    #[tokio::test]
    async fn disabled_workers_refuse_tasks() {
        let mut config = EngineConfig::default();
        config.archive.enabled = false;
        let (engine, _, _) = engine(config);
        engine.start().unwrap();

        assert!(engine.submit_archive(ArchiveTask::RunAll).is_err());
        assert!(engine.submit_reconcile(ReconcileTask::RunNext).is_ok());
        engine.shutdown().await.unwrap();
        assert!(engine.submit_reconcile(ReconcileTask::RunNext).is_err());
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (engine, _, _) = engine(EngineConfig::default());
        assert!(matches!(
            engine.start(),
            Err(EngineError::Config(ConfigError::NoRuntime))
        ));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: u64,
    }

    #[tokio::test(start_paused = true)]
    async fn cache_aside_uses_configured_ttl() {
        let mut config = EngineConfig::default();
        config.cache.ttl_ms = 1_000;
        let (engine, hot, _) = engine(config);
        let cache = engine.cache_aside(
            "post",
            FnLoader::new(|key: String| async move {
                Ok::<_, anyhow::Error>(Some(Post { id: key.parse()? }))
            }),
        );

        assert_eq!(cache.load("7").await.unwrap(), Some(Post { id: 7 }));
        assert!(hot.exists("post:7").await.unwrap());
        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(!hot.exists("post:7").await.unwrap());
    }
}
