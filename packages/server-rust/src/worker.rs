//! Scheduled maintenance loop shared by the archiver and the reconciler.
//!
//! A [`BackgroundWorker`] owns one spawned task that interleaves queued
//! on-demand requests with a fixed-interval pass, and runs them one at a time
//! so a pass never overlaps another pass or a request.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Capacity of a worker's task channel.
pub const TASK_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// BackgroundRunnable
// ---------------------------------------------------------------------------

/// The job a [`BackgroundWorker`] drives.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// On-demand request type.
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    /// Scheduled pass.
    async fn on_tick(&mut self) {}

    /// Runs once after the loop exits.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running maintenance loop.
///
/// The first scheduled pass happens one `tick_interval` after start. A pass
/// or request that overruns the interval pushes the next pass back instead of
/// firing the missed ones in a burst.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    name: &'static str,
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the loop on the current tokio runtime.
    pub fn start(name: &'static str, mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(tick_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() completes its first tick immediately.
            ticks.tick().await;
            debug!(worker = name, ?tick_interval, "worker started");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = ticks.tick() => runnable.on_tick().await,
                }
            }

            runnable.shutdown().await;
            debug!(worker = name, "worker stopped");
        });

        Self {
            name,
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    fn sender(&self) -> anyhow::Result<&mpsc::Sender<R::Task>> {
        self.tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("worker `{}` not running", self.name))
    }

    /// Queues a request, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns an error once the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        self.sender()?
            .send(task)
            .await
            .map_err(|_| anyhow::anyhow!("worker `{}` channel closed", self.name))
    }

    /// Queues a request if there is room right now.
    ///
    /// # Errors
    ///
    /// Returns an error once the worker has been stopped, or when the queue is
    /// full.
    pub fn try_submit(&self, task: R::Task) -> anyhow::Result<()> {
        self.sender()?
            .try_send(task)
            .map_err(|e| anyhow::anyhow!("worker `{}` rejected task: {e}", self.name))
    }

    /// Ends the loop after the current pass or request and waits for it.
    /// Requests still queued are discarded.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default, Clone)]
    struct Counters {
        runs: Arc<AtomicU32>,
        ticks: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
    }

    struct CountingRunnable(Counters);

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.0.runs.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.0.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            "test",
            CountingRunnable(counters.clone()),
            Duration::from_secs(60),
        );
        assert!(worker.is_running());

        worker.submit("task-1".to_string()).await.unwrap();
        worker.submit("task-2".to_string()).await.unwrap();
        worker.try_submit("task-3".to_string()).unwrap();

        // Give the worker time to process tasks.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.runs.load(Ordering::SeqCst), 3);

        worker.stop().await;
        assert!(!worker.is_running());
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fires_on_interval_not_at_startup() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(
            "test",
            CountingRunnable(counters.clone()),
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counters.ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(counters.ticks.load(Ordering::SeqCst), 3);

        worker.stop().await;
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let mut worker = BackgroundWorker::start(
            "test",
            CountingRunnable(Counters::default()),
            Duration::from_secs(60),
        );
        worker.stop().await;

        assert!(worker.submit("late-task".to_string()).await.is_err());
        assert!(worker.try_submit("late-task".to_string()).is_err());
    }
}
