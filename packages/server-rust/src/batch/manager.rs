//! Write-behind batch manager for one stream.
//!
//! [`BatchTaskManager`] accepts high-frequency operations through
//! [`add_operation`](BatchTaskManager::add_operation), deduplicates them by
//! key, and writes them to durable storage through a [`BatchWriter`] when
//! either the size threshold is reached or the flush delay elapses since the
//! first unflushed operation, whichever comes first.
//!
//! Failed writes are compensated: the generation is merged back into the
//! buffer (newer values win) and the delayed flush is re-armed, so every
//! operation is eventually delivered at least once.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use super::buffer::BatchBuffer;
use super::timer::FlushTimer;
use crate::config::StreamConfig;
use crate::error::{BatchError, ConfigError};

// ---------------------------------------------------------------------------
// Operation traits
// ---------------------------------------------------------------------------

/// Identity of a buffered operation. Blanket-implemented.
pub trait OperationKey: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static {}

impl<T> OperationKey for T where T: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static {}

/// Latest desired state for a key. Blanket-implemented.
pub trait OperationValue: Clone + Send + Sync + fmt::Debug + 'static {}

impl<T> OperationValue for T where T: Clone + Send + Sync + fmt::Debug + 'static {}

/// Durable-write callback invoked with one deduplicated generation.
///
/// Must be idempotent: a generation may be delivered again after a failure.
#[async_trait]
pub trait BatchWriter<K: OperationKey, V: OperationValue>: Send + Sync + 'static {
    async fn write_batch(&self, batch: &HashMap<K, V>) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`BatchWriter`]. The closure receives an
/// owned copy of the generation.
pub struct FnWriter<F> {
    f: F,
}

impl<F> FnWriter<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<K, V, F, Fut> BatchWriter<K, V> for FnWriter<F>
where
    K: OperationKey,
    V: OperationValue,
    F: Fn(HashMap<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn write_batch(&self, batch: &HashMap<K, V>) -> anyhow::Result<()> {
        (self.f)(batch.clone()).await
    }
}

// ---------------------------------------------------------------------------
// Flush bookkeeping
// ---------------------------------------------------------------------------

/// What started a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The live generation reached the size threshold.
    Threshold,
    /// The delay since the first unflushed operation elapsed.
    Timer,
    /// An explicit [`BatchTaskManager::flush`] call.
    Manual,
    /// Final drain on engine shutdown.
    Shutdown,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::Timer => "timer",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Cumulative counters of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Generations written successfully.
    pub batches_written: u64,
    /// Operations written successfully.
    pub operations_written: u64,
    /// Generations whose write failed.
    pub failed_batches: u64,
    /// Operations merged back into the buffer after a failure.
    pub requeued_operations: u64,
}

#[derive(Debug, Default)]
struct AtomicStats {
    batches_written: AtomicU64,
    operations_written: AtomicU64,
    failed_batches: AtomicU64,
    requeued_operations: AtomicU64,
}

impl AtomicStats {
    fn snapshot(&self) -> FlushStats {
        FlushStats {
            batches_written: self.batches_written.load(Ordering::Relaxed),
            operations_written: self.operations_written.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            requeued_operations: self.requeued_operations.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// BatchTaskManager
// ---------------------------------------------------------------------------

struct BufferState<K, V> {
    buffer: BatchBuffer<K, V>,
    timer: FlushTimer,
}

struct Inner<K: OperationKey, V: OperationValue> {
    config: StreamConfig,
    writer: Arc<dyn BatchWriter<K, V>>,
    state: Mutex<BufferState<K, V>>,
    /// Serializes flushes of this stream; never held by `add_operation`.
    flush_lock: tokio::sync::Mutex<()>,
    runtime: Handle,
    stats: AtomicStats,
}

/// Owns the buffer and flush trigger of one write-behind stream.
///
/// Cheap to clone; clones share the same buffer.
pub struct BatchTaskManager<K: OperationKey, V: OperationValue> {
    inner: Arc<Inner<K, V>>,
}

impl<K: OperationKey, V: OperationValue> Clone for BatchTaskManager<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: OperationKey, V: OperationValue> fmt::Debug for BatchTaskManager<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchTaskManager")
            .field("stream", &self.inner.config.name)
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl<K: OperationKey, V: OperationValue> BatchTaskManager<K, V> {
    /// Creates a manager bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a zero threshold or delay, or when called
    /// outside a runtime context.
    pub fn new(config: StreamConfig, writer: impl BatchWriter<K, V>) -> Result<Self, ConfigError> {
        Self::with_writer(config, Arc::new(writer))
    }

    /// Like [`new`](Self::new), for a writer already shared elsewhere.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_writer(
        config: StreamConfig,
        writer: Arc<dyn BatchWriter<K, V>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                writer,
                state: Mutex::new(BufferState {
                    buffer: BatchBuffer::new(),
                    timer: FlushTimer::new(),
                }),
                flush_lock: tokio::sync::Mutex::new(()),
                runtime,
                stats: AtomicStats::default(),
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Records the latest desired state for `key`. Never blocks on I/O.
    ///
    /// Reaching the size threshold seals the live generation and spawns an
    /// immediate flush; otherwise a delayed flush is armed unless one already
    /// is.
    pub fn add_operation(&self, key: K, value: V) {
        let mut state = self.inner.state.lock();
        let live = state.buffer.upsert(key, value);

        if live >= self.inner.config.size_threshold {
            state.buffer.seal();
            state.timer.cancel();
            drop(state);

            debug!(stream = %self.name(), size = live, "size threshold reached");
            let inner = Arc::clone(&self.inner);
            self.inner.runtime.spawn(async move {
                // Failures are logged and compensated inside flush.
                let _ = inner.flush(FlushReason::Threshold).await;
            });
        } else if !state.timer.is_armed() {
            self.inner.arm_timer(&mut state);
        }
    }

    /// Writes every pending operation now.
    ///
    /// Returns the number of operations written; flushing an empty buffer is
    /// a no-op returning 0.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::WriteFailed`] when the durable write fails. The
    /// failed generation has been merged back and the delayed flush re-armed.
    pub async fn flush(&self) -> Result<usize, BatchError> {
        self.inner.flush(FlushReason::Manual).await
    }

    /// Final flush used on shutdown. Unlike [`flush`](Self::flush), a failure
    /// leaves the operations buffered without re-arming the timer.
    ///
    /// # Errors
    ///
    /// See [`flush`](Self::flush).
    pub async fn drain(&self) -> Result<usize, BatchError> {
        self.inner.flush(FlushReason::Shutdown).await
    }

    /// Operations accepted but not yet durably written.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Latest pending value per key.
    #[must_use]
    pub fn pending_snapshot(&self) -> HashMap<K, V> {
        self.inner.state.lock().buffer.snapshot()
    }

    #[must_use]
    pub fn is_timer_armed(&self) -> bool {
        self.inner.state.lock().timer.is_armed()
    }

    #[must_use]
    pub fn stats(&self) -> FlushStats {
        self.inner.stats.snapshot()
    }
}

impl<K: OperationKey, V: OperationValue> Inner<K, V> {
    fn arm_timer(self: &Arc<Self>, state: &mut BufferState<K, V>) {
        let weak = Arc::downgrade(self);
        state
            .timer
            .arm(&self.runtime, self.config.flush_delay(), move |ticket| async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let claimed = inner.state.lock().timer.disarm_if(ticket);
                if claimed {
                    let _ = inner.flush(FlushReason::Timer).await;
                }
            });
    }

    async fn flush(self: &Arc<Self>, reason: FlushReason) -> Result<usize, BatchError> {
        let _serial = self.flush_lock.lock().await;

        {
            let mut state = self.state.lock();
            // Threshold flushes only drain what add_operation already sealed;
            // the live generation keeps its own timer.
            if reason != FlushReason::Threshold && state.buffer.seal() {
                state.timer.cancel();
            }
            if !state.buffer.has_sealed() {
                return Ok(0);
            }
        }

        let stream = self.config.name.as_str();
        let mut written = 0;
        loop {
            let next = self.state.lock().buffer.pop_sealed();
            let Some(batch) = next else {
                break;
            };
            let size = batch.len();

            match self.writer.write_batch(&batch).await {
                Ok(()) => {
                    written += size;
                    self.stats.batches_written.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .operations_written
                        .fetch_add(size as u64, Ordering::Relaxed);
                    counter!("hotsync_flush_total", "stream" => stream.to_string(), "outcome" => "ok")
                        .increment(1);
                    counter!("hotsync_flush_operations_total", "stream" => stream.to_string())
                        .increment(size as u64);
                    debug!(stream, reason = reason.as_str(), size, "generation written");
                }
                Err(source) => {
                    let (requeued, pending) = {
                        let mut state = self.state.lock();
                        let requeued = state.buffer.restore(batch);
                        if reason != FlushReason::Shutdown
                            && !state.buffer.is_empty()
                            && !state.timer.is_armed()
                        {
                            self.arm_timer(&mut state);
                        }
                        (requeued, state.buffer.len())
                    };
                    self.stats.failed_batches.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .requeued_operations
                        .fetch_add(requeued as u64, Ordering::Relaxed);
                    counter!("hotsync_flush_total", "stream" => stream.to_string(), "outcome" => "error")
                        .increment(1);
                    counter!("hotsync_requeued_operations_total", "stream" => stream.to_string())
                        .increment(requeued as u64);
                    error!(
                        stream,
                        reason = reason.as_str(),
                        size,
                        requeued,
                        pending,
                        error = %source,
                        "flush failed; generation re-buffered"
                    );
                    return Err(BatchError::WriteFailed {
                        stream: stream.to_string(),
                        requeued,
                        source,
                    });
                }
            }
        }

        let live = self.state.lock().buffer.live_len();
        info!(stream, reason = reason.as_str(), written, live, "flush complete");
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
