//! Fast key-value store holding counters, relation sets and recent metrics.
//!
//! Defines [`HotStore`], the narrow slice of a Redis-like API the engine
//! needs. Values are strings; sets and sorted sets are keyed by string
//! members. Implementations must be safe to share as `Arc<dyn HotStore>`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

/// Redis-like hot store.
///
/// Type errors (a set operation on a string key, for example) are reported as
/// errors rather than silently coercing the value.
#[async_trait]
pub trait HotStore: Send + Sync {
    /// Returns the string stored at `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Stores `value` at `key`, replacing any value of any type.
    ///
    /// `ttl = None` keeps the value until it is deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Removes `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;

    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Adds members to the set at `key`. Returns the number newly added.
    async fn set_add(&self, key: &str, members: &[String]) -> anyhow::Result<u64>;

    /// Removes members from the set at `key`. Returns the number removed.
    async fn set_remove(&self, key: &str, members: &[String]) -> anyhow::Result<u64>;

    /// All members of the set at `key`; empty if absent.
    async fn set_members(&self, key: &str) -> anyhow::Result<HashSet<String>>;

    async fn set_card(&self, key: &str) -> anyhow::Result<u64>;

    /// Atomically adds `delta` to the integer at `key` (missing = 0) and
    /// returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> anyhow::Result<i64>;

    /// Sets the score of `member` in the sorted set at `key`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> anyhow::Result<()>;

    async fn zscore(&self, key: &str, member: &str) -> anyhow::Result<Option<f64>>;

    /// Members with `min <= score <= max`, ascending by score, at most `limit`.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> anyhow::Result<Vec<(String, f64)>>;

    /// Removes members with `min <= score <= max`. Returns the number removed.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> anyhow::Result<u64>;

    /// Live keys starting with `prefix`, sorted.
    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}
