use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::RwLock;

use super::manager::{BatchTaskManager, OperationKey, OperationValue};
use crate::error::{BatchError, EngineError};

// ---------------------------------------------------------------------------
// StreamHandle trait
// ---------------------------------------------------------------------------

/// Type-erased view of a [`BatchTaskManager`], used for lifecycle operations
/// that do not care about the key and value types.
#[async_trait]
pub trait StreamHandle: Send + Sync + Any {
    fn name(&self) -> &str;

    fn pending_len(&self) -> usize;

    /// Final flush of everything buffered.
    async fn drain(&self) -> Result<usize, BatchError>;
}

#[async_trait]
impl<K: OperationKey, V: OperationValue> StreamHandle for BatchTaskManager<K, V> {
    fn name(&self) -> &str {
        BatchTaskManager::name(self)
    }

    fn pending_len(&self) -> usize {
        BatchTaskManager::pending_len(self)
    }

    async fn drain(&self) -> Result<usize, BatchError> {
        BatchTaskManager::drain(self).await
    }
}

// ---------------------------------------------------------------------------
// StreamRegistry
// ---------------------------------------------------------------------------

/// Registry of write-behind streams keyed by stream name.
///
/// Provides two lookup mechanisms:
/// - **Typed** (`get::<K, V>`): downcasts to the concrete manager
/// - **Erased** (`handle`): lifecycle access without the type parameters
///
/// Streams are drained concurrently on shutdown; registration order is kept
/// for deterministic reporting.
pub struct StreamRegistry {
    /// Name-based erased lookup.
    handles: DashMap<String, Arc<dyn StreamHandle>>,
    /// Name-based typed lookup: name -> `Arc<BatchTaskManager<K, V>>`.
    typed: DashMap<String, Arc<dyn Any + Send + Sync>>,
    /// Registration order.
    order: RwLock<Vec<String>>,
}

impl StreamRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            typed: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a stream under its configured name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateStream`] if the name is taken.
    pub fn register<K: OperationKey, V: OperationValue>(
        &self,
        manager: BatchTaskManager<K, V>,
    ) -> Result<(), EngineError> {
        let name = manager.name().to_string();
        let mut order = self.order.write();
        if order.contains(&name) {
            return Err(EngineError::DuplicateStream(name));
        }
        let arc = Arc::new(manager);
        self.handles.insert(name.clone(), arc.clone());
        self.typed.insert(name.clone(), arc);
        order.push(name);
        Ok(())
    }

    /// Retrieves a stream by name with its concrete key and value types.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownStream`] or
    /// [`EngineError::StreamTypeMismatch`].
    pub fn get<K: OperationKey, V: OperationValue>(
        &self,
        name: &str,
    ) -> Result<BatchTaskManager<K, V>, EngineError> {
        let entry = self
            .typed
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::UnknownStream(name.to_string()))?;
        entry
            .downcast::<BatchTaskManager<K, V>>()
            .map(|manager| (*manager).clone())
            .map_err(|_| EngineError::StreamTypeMismatch(name.to_string()))
    }

    /// Retrieves the type-erased handle of a stream.
    #[must_use]
    pub fn handle(&self, name: &str) -> Option<Arc<dyn StreamHandle>> {
        self.handles.get(name).map(|entry| entry.value().clone())
    }

    /// Stream names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.read().is_empty()
    }

    /// Operations buffered across all streams.
    #[must_use]
    pub fn pending_total(&self) -> usize {
        self.handles.iter().map(|entry| entry.value().pending_len()).sum()
    }

    /// Drains every stream concurrently.
    ///
    /// Returns `(stream, result)` pairs in registration order.
    pub async fn drain_all(&self) -> Vec<(String, Result<usize, BatchError>)> {
        let handles: Vec<_> = self
            .names()
            .into_iter()
            .filter_map(|name| self.handle(&name).map(|h| (name, h)))
            .collect();
        let results = join_all(handles.iter().map(|(_, handle)| handle.drain())).await;
        handles
            .into_iter()
            .map(|(name, _)| name)
            .zip(results)
            .collect()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
