//! Built-in archive sources: browse history, time-window statistics and
//! daily unique visitors.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use hotsync_core::keys::{
    self, parse_browse_history_key, parse_uv_daily_key, parse_window_stats_key,
    BROWSE_HISTORY_PREFIX, UV_DAILY_PREFIX,
};
use hotsync_core::time::date_bucket_start;
use hotsync_core::{ArchiveRecord, BrowseRecord, EntityId, UvRecord, WindowStatRecord};
use tracing::warn;

use super::source::ArchiveSource;
use crate::storage::HotStore;

/// Sorted-set scores are epoch millis, well inside f64's exact integer range.
#[allow(clippy::cast_precision_loss)]
fn score_of(millis: i64) -> f64 {
    millis as f64
}

#[allow(clippy::cast_possible_truncation)]
fn millis_of(score: f64) -> i64 {
    score as i64
}

/// Reads every member scored at or before `horizon`.
async fn due_members(
    hot: &dyn HotStore,
    key: &str,
    horizon: i64,
) -> anyhow::Result<Vec<(String, f64)>> {
    hot.zrange_by_score(key, f64::NEG_INFINITY, score_of(horizon), usize::MAX)
        .await
}

async fn trim_due(hot: &dyn HotStore, key: &str, horizon: i64) -> anyhow::Result<u64> {
    hot.zrem_range_by_score(key, f64::NEG_INFINITY, score_of(horizon))
        .await
}

// ---------------------------------------------------------------------------
// Browse history
// ---------------------------------------------------------------------------

/// Per-user browse history: `browse:history:user:{id}` sorted sets of post
/// ids scored by view time.
#[derive(Debug, Clone)]
pub struct BrowseHistorySource {
    keep_days: u32,
}

impl BrowseHistorySource {
    pub const NAME: &'static str = "browse_history";

    #[must_use]
    pub fn new(keep_days: u32) -> Self {
        Self { keep_days }
    }
}

#[async_trait]
impl ArchiveSource for BrowseHistorySource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn keep_days(&self) -> u32 {
        self.keep_days
    }

    fn key_prefixes(&self) -> Vec<String> {
        vec![BROWSE_HISTORY_PREFIX.to_string()]
    }

    async fn collect(
        &self,
        hot: &dyn HotStore,
        key: &str,
        horizon: i64,
    ) -> anyhow::Result<Vec<ArchiveRecord>> {
        let user_id = parse_browse_history_key(key)
            .ok_or_else(|| anyhow!("malformed browse history key `{key}`"))?;
        due_members(hot, key, horizon)
            .await?
            .into_iter()
            .map(|(member, score)| -> anyhow::Result<ArchiveRecord> {
                let post_id: EntityId = member
                    .parse()
                    .with_context(|| format!("invalid post id `{member}` in `{key}`"))?;
                Ok(BrowseRecord {
                    user_id,
                    post_id,
                    browse_time: millis_of(score),
                }
                .into())
            })
            .collect()
    }

    async fn evict(&self, hot: &dyn HotStore, key: &str, horizon: i64) -> anyhow::Result<u64> {
        trim_due(hot, key, horizon).await
    }
}

// ---------------------------------------------------------------------------
// Time-window statistics
// ---------------------------------------------------------------------------

/// Generic time-windowed metrics: `stats:window:{metric}` sorted sets of
/// observed values scored by timestamp.
///
/// Only metrics on the allow-list are archived; a listed base name also
/// covers suffixed keys (`post:view` covers `post:view:42`).
#[derive(Debug, Clone)]
pub struct WindowStatsSource {
    keep_days: u32,
    metrics: Vec<String>,
}

impl WindowStatsSource {
    pub const NAME: &'static str = "window_stats";

    #[must_use]
    pub fn new(keep_days: u32, metrics: Vec<String>) -> Self {
        Self { keep_days, metrics }
    }
}

#[async_trait]
impl ArchiveSource for WindowStatsSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn keep_days(&self) -> u32 {
        self.keep_days
    }

    fn key_prefixes(&self) -> Vec<String> {
        self.metrics
            .iter()
            .filter(|m| !m.is_empty())
            .map(|m| keys::window_stats_key(m))
            .collect()
    }

    async fn collect(
        &self,
        hot: &dyn HotStore,
        key: &str,
        horizon: i64,
    ) -> anyhow::Result<Vec<ArchiveRecord>> {
        let metric = parse_window_stats_key(key)
            .ok_or_else(|| anyhow!("malformed window statistics key `{key}`"))?;
        Ok(due_members(hot, key, horizon)
            .await?
            .into_iter()
            .map(|(value, score)| {
                WindowStatRecord {
                    metric: metric.to_string(),
                    value,
                    timestamp: millis_of(score),
                }
                .into()
            })
            .collect())
    }

    async fn evict(&self, hot: &dyn HotStore, key: &str, horizon: i64) -> anyhow::Result<u64> {
        trim_due(hot, key, horizon).await
    }
}

// ---------------------------------------------------------------------------
// Unique visitors
// ---------------------------------------------------------------------------

/// Daily unique visitors: `uv:daily:{type}:{id}:{yyyyMMdd}` sets of visitor
/// ids. The whole key is archived once its day starts before the horizon.
#[derive(Debug, Clone)]
pub struct UvSource {
    keep_days: u32,
}

impl UvSource {
    pub const NAME: &'static str = "uv";

    #[must_use]
    pub fn new(keep_days: u32) -> Self {
        Self { keep_days }
    }
}

#[async_trait]
impl ArchiveSource for UvSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn keep_days(&self) -> u32 {
        self.keep_days
    }

    fn key_prefixes(&self) -> Vec<String> {
        vec![UV_DAILY_PREFIX.to_string()]
    }

    fn is_retained(&self, key: &str, horizon: i64) -> bool {
        parse_uv_daily_key(key).is_some_and(|uv| date_bucket_start(uv.date) >= horizon)
    }

    async fn collect(
        &self,
        hot: &dyn HotStore,
        key: &str,
        horizon: i64,
    ) -> anyhow::Result<Vec<ArchiveRecord>> {
        let uv = parse_uv_daily_key(key).ok_or_else(|| anyhow!("malformed UV key `{key}`"))?;
        if date_bucket_start(uv.date) >= horizon {
            return Ok(Vec::new());
        }
        let mut visitors: Vec<String> = hot.set_members(key).await?.into_iter().collect();
        visitors.sort_unstable();
        Ok(visitors
            .into_iter()
            .map(|visitor_id| {
                UvRecord {
                    resource_type: uv.resource_type.clone(),
                    resource_id: uv.resource_id,
                    date: uv.date,
                    visitor_id,
                }
                .into()
            })
            .collect())
    }

    async fn evict(&self, hot: &dyn HotStore, key: &str, horizon: i64) -> anyhow::Result<u64> {
        if self.is_retained(key, horizon) {
            return Ok(0);
        }
        if parse_uv_daily_key(key).is_none() {
            warn!(key, "refusing to evict malformed UV key");
            return Ok(0);
        }
        Ok(u64::from(hot.delete(key).await?))
    }
}
