//! Archive source trait.
//!
//! An [`ArchiveSource`] describes one family of hot-store keys that age out
//! into cold storage: which keys to scan, how long data stays hot, how to read
//! the aged part of a key as records, and how to remove it once durable.

use async_trait::async_trait;
use hotsync_core::ArchiveRecord;

use crate::storage::HotStore;

/// One family of hot keys moved to cold storage by the
/// [`Archiver`](super::Archiver).
///
/// `horizon` is an epoch-millis cut-off computed from
/// [`keep_days`](Self::keep_days): data at or before it is due.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Stable name used in logs, metrics and on-demand runs.
    fn name(&self) -> &str;

    /// Days data stays in the hot store.
    fn keep_days(&self) -> u32;

    /// Key prefixes scanned for candidates. Empty means nothing is configured
    /// for archiving.
    fn key_prefixes(&self) -> Vec<String>;

    /// Whether the key name alone proves it holds no due data, letting the
    /// archiver skip reading it. Defaults to `false`.
    fn is_retained(&self, _key: &str, _horizon: i64) -> bool {
        false
    }

    /// Reads the due part of `key` as records.
    async fn collect(
        &self,
        hot: &dyn HotStore,
        key: &str,
        horizon: i64,
    ) -> anyhow::Result<Vec<ArchiveRecord>>;

    /// Removes the due part of `key`. Only called after every record
    /// collected from it was stored durably. Returns the number of entries
    /// removed.
    async fn evict(&self, hot: &dyn HotStore, key: &str, horizon: i64) -> anyhow::Result<u64>;
}
