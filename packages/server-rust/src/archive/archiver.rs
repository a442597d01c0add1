//! Time-window archiver.
//!
//! For each [`ArchiveSource`] the archiver repeats a scan, collect, write,
//! evict round until nothing due is left or the iteration cap is reached:
//!
//! 1. Scan the source's key prefixes in the hot store.
//! 2. Collect due records from every key not provably retained.
//! 3. Upsert the records into the durable store in chunks of `batch_size`.
//! 4. Evict from the hot store only keys whose records were all stored.
//!
//! A failed chunk stops the source for this run; the data stays hot and the
//! next run starts over. Durable upserts are idempotent, so re-archiving a key
//! whose eviction failed is harmless.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use hotsync_core::time::{now_millis, retention_horizon};
use hotsync_core::ArchiveRecord;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::source::ArchiveSource;
use super::sources::{BrowseHistorySource, UvSource, WindowStatsSource};
use crate::config::ArchiveConfig;
use crate::storage::{DurableStore, HotStore};

/// Outcome of archiving one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub source: String,
    /// Rounds that found at least one candidate key.
    pub iterations: u32,
    /// Records stored durably during this run.
    pub archived: u64,
    /// Hot entries removed after archiving.
    pub evicted: u64,
    pub failed_batches: u32,
    /// Keys whose collection or eviction failed.
    pub skipped_keys: usize,
    /// The run stopped early on a scan or write failure.
    pub aborted: bool,
}

/// Moves aged hot-store data into the durable store.
pub struct Archiver {
    hot: Arc<dyn HotStore>,
    durable: Arc<dyn DurableStore>,
    sources: Vec<Arc<dyn ArchiveSource>>,
    batch_size: usize,
    max_iterations: u32,
}

impl Archiver {
    /// Builds an archiver with the browse-history, window-statistics and UV
    /// sources configured from `config`.
    #[must_use]
    pub fn new(
        hot: Arc<dyn HotStore>,
        durable: Arc<dyn DurableStore>,
        config: &ArchiveConfig,
    ) -> Self {
        let sources: Vec<Arc<dyn ArchiveSource>> = vec![
            Arc::new(BrowseHistorySource::new(config.browse_keep_days)),
            Arc::new(WindowStatsSource::new(
                config.stats_keep_days,
                config.metrics.clone(),
            )),
            Arc::new(UvSource::new(config.uv_keep_days)),
        ];
        Self::with_sources(hot, durable, sources, config.batch_size, config.max_iterations)
    }

    #[must_use]
    pub fn with_sources(
        hot: Arc<dyn HotStore>,
        durable: Arc<dyn DurableStore>,
        sources: Vec<Arc<dyn ArchiveSource>>,
        batch_size: usize,
        max_iterations: u32,
    ) -> Self {
        Self {
            hot,
            durable,
            sources,
            batch_size: batch_size.max(1),
            max_iterations: max_iterations.max(1),
        }
    }

    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Archives every source against the current wall clock.
    pub async fn run_all(&self) -> Vec<ArchiveReport> {
        self.run_all_at(now_millis()).await
    }

    /// Archives every source as if the time were `now` (epoch millis).
    pub async fn run_all_at(&self, now: i64) -> Vec<ArchiveReport> {
        let mut reports = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            reports.push(self.run_source(source.as_ref(), now).await);
        }
        reports
    }

    /// Archives a single source by name; `None` if no source has that name.
    pub async fn run_source_named(&self, name: &str, now: i64) -> Option<ArchiveReport> {
        let source = self.sources.iter().find(|s| s.name() == name)?;
        Some(self.run_source(source.as_ref(), now).await)
    }

    /// Runs scan/collect/write/evict rounds for one source.
    pub async fn run_source(&self, source: &dyn ArchiveSource, now: i64) -> ArchiveReport {
        let name = source.name();
        let mut report = ArchiveReport {
            source: name.to_string(),
            ..ArchiveReport::default()
        };

        let prefixes = source.key_prefixes();
        if prefixes.is_empty() {
            warn!(source = name, "no keys configured for archiving; skipping");
            return report;
        }
        let horizon = retention_horizon(now, source.keep_days());
        // Keys that failed collection or eviction are left alone for the rest
        // of the run.
        let mut skipped = HashSet::new();

        while report.iterations < self.max_iterations {
            let keys = match self.scan(&prefixes).await {
                Ok(keys) => keys,
                Err(err) => {
                    error!(source = name, error = %err, "hot store scan failed");
                    report.aborted = true;
                    break;
                }
            };
            if keys.is_empty() {
                break;
            }
            report.iterations += 1;

            let collected = self.collect(source, &keys, horizon, &mut skipped).await;
            if collected.is_empty() {
                debug!(source = name, iteration = report.iterations, "nothing due");
                break;
            }

            let stored_keys = self.write(name, &collected, &mut report).await;
            for key in stored_keys {
                match source.evict(self.hot.as_ref(), key, horizon).await {
                    Ok(removed) => report.evicted += removed,
                    Err(err) => {
                        warn!(source = name, key, error = %err, "eviction failed; key stays hot");
                        skipped.insert(key.to_string());
                    }
                }
            }
            if report.aborted {
                break;
            }
        }

        report.skipped_keys = skipped.len();
        if report.iterations == self.max_iterations {
            warn!(source = name, iterations = report.iterations, "iteration cap reached");
        }
        counter!("hotsync_archived_records_total", "source" => name.to_string())
            .increment(report.archived);
        info!(
            source = name,
            iterations = report.iterations,
            archived = report.archived,
            evicted = report.evicted,
            failed_batches = report.failed_batches,
            skipped_keys = report.skipped_keys,
            "archive run finished"
        );
        report
    }

    async fn scan(&self, prefixes: &[String]) -> anyhow::Result<Vec<String>> {
        let mut keys = BTreeSet::new();
        for prefix in prefixes {
            keys.extend(self.hot.scan_prefix(prefix).await?);
        }
        Ok(keys.into_iter().collect())
    }

    async fn collect(
        &self,
        source: &dyn ArchiveSource,
        keys: &[String],
        horizon: i64,
        skipped: &mut HashSet<String>,
    ) -> Vec<(String, Vec<ArchiveRecord>)> {
        let mut collected = Vec::new();
        for key in keys {
            if skipped.contains(key) || source.is_retained(key, horizon) {
                continue;
            }
            match source.collect(self.hot.as_ref(), key, horizon).await {
                Ok(records) if records.is_empty() => {}
                Ok(records) => collected.push((key.clone(), records)),
                Err(err) => {
                    warn!(source = source.name(), key = %key, error = %err, "collect failed; key skipped");
                    skipped.insert(key.clone());
                }
            }
        }
        collected
    }

    /// Writes all collected records in chunks and returns the keys whose
    /// records were all stored. Stops at the first failed chunk.
    async fn write<'a>(
        &self,
        source: &str,
        collected: &'a [(String, Vec<ArchiveRecord>)],
        report: &mut ArchiveReport,
    ) -> Vec<&'a str> {
        let records: Vec<ArchiveRecord> = collected
            .iter()
            .flat_map(|(_, records)| records.iter().cloned())
            .collect();

        let mut stored = 0;
        for chunk in records.chunks(self.batch_size) {
            match self.durable.upsert_archived(chunk).await {
                Ok(_) => stored += chunk.len(),
                Err(err) => {
                    error!(
                        source,
                        offset = stored,
                        size = chunk.len(),
                        error = %err,
                        "archive batch failed; data stays hot"
                    );
                    report.failed_batches += 1;
                    report.aborted = true;
                    break;
                }
            }
        }
        report.archived += stored as u64;

        let mut end = 0;
        collected
            .iter()
            .filter_map(|(key, records)| {
                end += records.len();
                (end <= stored).then_some(key.as_str())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use hotsync_core::keys::browse_history_key;
    use hotsync_core::time::MILLIS_PER_DAY;

    use super::*;
    use crate::storage::{MemoryDurableStore, MemoryHotStore};

    const NOW: i64 = 1_704_067_200_000;

    #[allow(clippy::cast_precision_loss)]
    fn days_ago(days: i64) -> f64 {
        (NOW - days * MILLIS_PER_DAY) as f64
    }

    fn archiver(
        hot: &Arc<MemoryHotStore>,
        durable: &Arc<MemoryDurableStore>,
        config: &ArchiveConfig,
    ) -> Archiver {
        Archiver::new(hot.clone(), durable.clone(), config)
    }

    #[tokio::test]
    async fn moves_aged_browse_history_and_keeps_recent() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let key = browse_history_key(1);
        hot.zadd(&key, "10", days_ago(5)).await.unwrap();
        hot.zadd(&key, "11", days_ago(1)).await.unwrap();

        let reports = archiver(&hot, &durable, &ArchiveConfig::default())
            .run_all_at(NOW)
            .await;
        let browse = &reports[0];
        assert_eq!(browse.source, "browse_history");
        assert_eq!(browse.archived, 1);
        assert_eq!(browse.evicted, 1);
        assert!(!browse.aborted);

        assert_eq!(durable.archived_browse().len(), 1);
        assert_eq!(hot.zscore(&key, "10").await.unwrap(), None);
        assert!(hot.zscore(&key, "11").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_write_keeps_data_hot() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let key = browse_history_key(1);
        hot.zadd(&key, "10", days_ago(5)).await.unwrap();
        durable.set_fail_writes(true);

        let report = archiver(&hot, &durable, &ArchiveConfig::default())
            .run_source_named("browse_history", NOW)
            .await
            .unwrap();
        assert!(report.aborted);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.evicted, 0);
        assert!(hot.zscore(&key, "10").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn only_fully_stored_keys_are_evicted() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        for user in 1..=3 {
            let key = browse_history_key(user);
            hot.zadd(&key, "1", days_ago(5)).await.unwrap();
            hot.zadd(&key, "2", days_ago(6)).await.unwrap();
        }
        let config = ArchiveConfig {
            batch_size: 3,
            ..ArchiveConfig::default()
        };
        // Second chunk fails: user 1 is fully stored, user 2 only in part.
        durable.fail_writes_after(1);
        let report = archiver(&hot, &durable, &config)
            .run_source_named("browse_history", NOW)
            .await
            .unwrap();

        assert_eq!(report.archived, 3);
        assert_eq!(report.evicted, 2);
        assert!(report.aborted);
        assert!(!hot.exists(&browse_history_key(1)).await.unwrap());
        assert!(hot.exists(&browse_history_key(2)).await.unwrap());
        assert!(hot.exists(&browse_history_key(3)).await.unwrap());
    }

    #[tokio::test]
    async fn empty_metric_allow_list_archives_nothing() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        hot.zadd("stats:window:post:view", "u1", days_ago(30))
            .await
            .unwrap();

        let report = archiver(&hot, &durable, &ArchiveConfig::default())
            .run_source_named("window_stats", NOW)
            .await
            .unwrap();
        assert_eq!(report, ArchiveReport {
            source: "window_stats".into(),
            ..ArchiveReport::default()
        });
        assert!(hot.exists("stats:window:post:view").await.unwrap());
    }

    #[tokio::test]
    async fn allow_listed_metrics_are_archived() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        hot.zadd("stats:window:post:view:9", "u1", days_ago(30))
            .await
            .unwrap();
        hot.zadd("stats:window:other", "u1", days_ago(30))
            .await
            .unwrap();
        let config = ArchiveConfig {
            metrics: vec!["post:view".into()],
            ..ArchiveConfig::default()
        };

        let report = archiver(&hot, &durable, &config)
            .run_source_named("window_stats", NOW)
            .await
            .unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(durable.archived_window_stats()[0].metric, "post:view:9");
        assert!(hot.exists("stats:window:other").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_source_name_is_none() {
        let hot = Arc::new(MemoryHotStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let archiver = archiver(&hot, &durable, &ArchiveConfig::default());
        assert_eq!(archiver.source_names(), vec!["browse_history", "window_stats", "uv"]);
        assert!(archiver.run_source_named("nope", NOW).await.is_none());
    }
}
