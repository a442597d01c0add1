//! Cache-aside loading with per-key single-flight.
//!
//! [`CacheAside`] wraps a [`SourceLoader`] (usually a durable-store query):
//! a hit is served from the hot store; a miss runs the loader once no matter
//! how many callers are waiting, writes the value back with a TTL, and hands
//! the same result to every waiter.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use hotsync_core::keys;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::storage::HotStore;

/// Values a [`CacheAside`] can hold.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Source of truth consulted on a cache miss.
#[async_trait]
pub trait SourceLoader<V>: Send + Sync + 'static {
    /// Returns `None` when nothing exists for `key`.
    async fn load(&self, key: &str) -> anyhow::Result<Option<V>>;
}

/// Adapts an async closure into a [`SourceLoader`].
pub struct FnLoader<F> {
    f: F,
}

impl<F> FnLoader<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<V, F, Fut> SourceLoader<V> for FnLoader<F>
where
    V: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
{
    async fn load(&self, key: &str) -> anyhow::Result<Option<V>> {
        (self.f)(key.to_string()).await
    }
}

/// Hit/miss counters of one [`CacheAside`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Loader invocations; lower than `misses` when single-flight coalesced.
    pub loads: u64,
}

/// Cache-aside wrapper around a loader.
pub struct CacheAside<V, L> {
    hot: Arc<dyn HotStore>,
    prefix: String,
    ttl: Duration,
    negative_ttl: Option<Duration>,
    loader: L,
    in_flight: DashMap<String, Arc<OnceCell<Option<V>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
}

/// Wraps `loader` so reads go through the hot store under `prefix`, with
/// values cached for `ttl`.
pub fn with_cache_aside<V: CacheValue, L: SourceLoader<V>>(
    hot: Arc<dyn HotStore>,
    prefix: impl Into<String>,
    ttl: Duration,
    loader: L,
) -> CacheAside<V, L> {
    CacheAside {
        hot,
        prefix: prefix.into(),
        ttl,
        negative_ttl: None,
        loader,
        in_flight: DashMap::new(),
        hits: AtomicU64::new(0),
        misses: AtomicU64::new(0),
        loads: AtomicU64::new(0),
    }
}

impl<V: CacheValue, L: SourceLoader<V>> CacheAside<V, L> {
    /// Builds a loader with TTLs taken from configuration.
    pub fn from_config(
        hot: Arc<dyn HotStore>,
        prefix: impl Into<String>,
        config: &CacheConfig,
        loader: L,
    ) -> Self {
        let mut cache = with_cache_aside(hot, prefix, config.ttl(), loader);
        cache.negative_ttl = config.negative_ttl();
        cache
    }

    /// Also caches absences for `ttl`.
    #[must_use]
    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = Some(ttl);
        self
    }

    /// Returns the value for `key`, from the hot store if present, otherwise
    /// from the loader.
    ///
    /// Hot-store failures degrade to a direct load; they never fail the call.
    ///
    /// # Errors
    ///
    /// Returns the loader's error. Waiters coalesced onto a failed load retry
    /// it themselves.
    pub async fn load(&self, key: &str) -> anyhow::Result<Option<V>> {
        let cache_key = keys::cache_key(&self.prefix, key);
        if let Some(cached) = self.read_cached(&cache_key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let cell = self
            .in_flight
            .entry(cache_key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let result = cell
            .get_or_try_init(|| self.load_and_fill(key, &cache_key))
            .await
            .cloned();
        self.in_flight
            .remove_if(&cache_key, |_, current| Arc::ptr_eq(current, &cell));
        result
    }

    /// Drops the cached entry so the next read reloads it.
    ///
    /// # Errors
    ///
    /// Returns the hot-store error.
    pub async fn invalidate(&self, key: &str) -> anyhow::Result<bool> {
        self.hot.delete(&keys::cache_key(&self.prefix, key)).await
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }

    /// `Some(value)` on a hit, where `value` may itself be a cached absence.
    async fn read_cached(&self, cache_key: &str) -> Option<Option<V>> {
        let raw = match self.hot.get(cache_key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key = cache_key, error = %err, "cache read failed; loading from source");
                return None;
            }
        };
        match serde_json::from_str::<Option<V>>(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = cache_key, error = %err, "undecodable cache entry ignored");
                None
            }
        }
    }

    async fn load_and_fill(&self, key: &str, cache_key: &str) -> anyhow::Result<Option<V>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let value = self.loader.load(key).await?;

        let ttl = match &value {
            Some(_) => Some(self.ttl),
            None => self.negative_ttl,
        };
        if let Some(ttl) = ttl {
            match serde_json::to_string(&value) {
                Ok(encoded) => {
                    if let Err(err) = self.hot.set(cache_key, &encoded, Some(ttl)).await {
                        warn!(key = cache_key, error = %err, "cache write-back failed");
                    }
                }
                Err(err) => warn!(key = cache_key, error = %err, "value not cacheable"),
            }
        }
        debug!(key = cache_key, found = value.is_some(), "cache miss loaded");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures_util::future::join_all;
    use serde::Deserialize;

    use super::*;
    use crate::storage::MemoryHotStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
    }

    /// Sleeps to widen the single-flight window and counts invocations.
    struct CountingLoader {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceLoader<Profile> for CountingLoader {
        async fn load(&self, key: &str) -> anyhow::Result<Option<Profile>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok((key != "missing").then(|| Profile {
                name: key.to_string(),
            }))
        }
    }

    fn counting_loader(calls: Arc<AtomicUsize>) -> CountingLoader {
        CountingLoader { calls }
    }

    #[tokio::test(start_paused = true)]
    async fn miss_loads_and_writes_back_then_hits() {
        let hot = Arc::new(MemoryHotStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = with_cache_aside(
            hot.clone(),
            "profile",
            Duration::from_secs(60),
            counting_loader(calls.clone()),
        );

        let first = cache.load("alice").await.unwrap();
        assert_eq!(first, Some(Profile { name: "alice".into() }));
        assert!(hot.exists("profile:alice").await.unwrap());

        let second = cache.load("alice").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                loads: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let hot = Arc::new(MemoryHotStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = with_cache_aside(
            hot,
            "profile",
            Duration::from_secs(60),
            counting_loader(calls.clone()),
        );

        cache.load("bob").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.load("bob").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn absence_is_not_cached_by_default() {
        let hot = Arc::new(MemoryHotStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = with_cache_aside(
            hot.clone(),
            "profile",
            Duration::from_secs(60),
            counting_loader(calls.clone()),
        );

        assert_eq!(cache.load("missing").await.unwrap(), None);
        assert_eq!(cache.load("missing").await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!hot.exists("profile:missing").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn negative_ttl_caches_absence() {
        let hot = Arc::new(MemoryHotStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = with_cache_aside(
            hot,
            "profile",
            Duration::from_secs(60),
            counting_loader(calls.clone()),
        )
        .with_negative_ttl(Duration::from_secs(5));

        assert_eq!(cache.load("missing").await.unwrap(), None);
        assert_eq!(cache.load("missing").await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_load() {
        let hot = Arc::new(MemoryHotStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = with_cache_aside(
            hot,
            "profile",
            Duration::from_secs(60),
            counting_loader(calls.clone()),
        );

        let results = join_all((0..10).map(|_| cache.load("carol"))).await;
        assert!(results
            .iter()
            .all(|r| r.as_ref().unwrap().as_ref().unwrap().name == "carol"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().loads, 1);
        assert_eq!(cache.stats().misses, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_a_reload() {
        let hot = Arc::new(MemoryHotStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = with_cache_aside(
            hot,
            "profile",
            Duration::from_secs(60),
            counting_loader(calls.clone()),
        );

        cache.load("dave").await.unwrap();
        assert!(cache.invalidate("dave").await.unwrap());
        cache.load("dave").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loader_errors_propagate() {
        let hot = Arc::new(MemoryHotStore::new());
        let cache: CacheAside<Profile, _> = with_cache_aside(
            hot,
            "profile",
            Duration::from_secs(60),
            FnLoader::new(|_key: String| async {
                Err::<Option<Profile>, _>(anyhow::anyhow!("db down"))
            }),
        );
        assert!(cache.load("erin").await.is_err());
    }
}
