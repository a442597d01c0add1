//! Engine configuration.
//!
//! Every struct implements `Default` with production values and deserializes
//! with per-field defaults, so a partial JSON document is enough to override
//! a single knob. Call [`EngineConfig::validate`] (done by
//! [`SyncEngine::new`](crate::SyncEngine::new)) to reject misuse up front.

use std::collections::HashSet;
use std::time::Duration;

use hotsync_core::DataClass;
use serde::Deserialize;

use crate::error::ConfigError;

/// Default bound on staleness of a buffered operation.
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 30_000;
/// Default buffer size that triggers an immediate flush.
pub const DEFAULT_SIZE_THRESHOLD: usize = 100;

/// Top-level configuration for [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-stream overrides. Streams registered without an entry here use
    /// [`StreamConfig::named`] defaults.
    pub streams: Vec<StreamConfig>,
    pub archive: ArchiveConfig,
    pub reconcile: ReconcileConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// Parses a JSON document and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and any error from
    /// [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Looks up the configuration of a named stream, falling back to defaults.
    #[must_use]
    pub fn stream(&self, name: &str) -> StreamConfig {
        self.streams
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .unwrap_or_else(|| StreamConfig::named(name))
    }

    /// # Errors
    ///
    /// Returns the first misconfiguration found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for stream in &self.streams {
            stream.validate()?;
            if !seen.insert(stream.name.as_str()) {
                return Err(ConfigError::DuplicateStream(stream.name.clone()));
            }
        }
        self.archive.validate()?;
        self.reconcile.validate()?;
        self.cache.validate()
    }
}

fn require_nonzero(value: u64, field: &'static str) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroValue { field })
    } else {
        Ok(())
    }
}

/// Tunables of one write-behind stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    /// Maximum time between the first unflushed operation and its flush.
    pub flush_delay_ms: u64,
    /// Buffer size at which a flush starts without waiting for the delay.
    pub size_threshold: usize,
}

impl StreamConfig {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// # Errors
    ///
    /// Rejects a zero threshold or a zero delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size_threshold == 0 {
            return Err(ConfigError::ZeroThreshold {
                stream: self.name.clone(),
            });
        }
        if self.flush_delay_ms == 0 {
            return Err(ConfigError::ZeroFlushDelay {
                stream: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            flush_delay_ms: DEFAULT_FLUSH_DELAY_MS,
            size_threshold: DEFAULT_SIZE_THRESHOLD,
        }
    }
}

/// Time-window archiver settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Base metric names eligible for time-window archiving. Empty means
    /// nothing to archive for that source.
    pub metrics: Vec<String>,
    pub browse_keep_days: u32,
    pub stats_keep_days: u32,
    pub uv_keep_days: u32,
    /// Maximum records per durable upsert.
    pub batch_size: usize,
    /// Scan/collect/write rounds per source per run.
    pub max_iterations: u32,
}

impl ArchiveConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero(self.interval_ms, "archive.interval_ms")?;
        require_nonzero(self.batch_size as u64, "archive.batch_size")?;
        require_nonzero(u64::from(self.max_iterations), "archive.max_iterations")
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 24 * 60 * 60 * 1000,
            metrics: Vec::new(),
            browse_keep_days: 3,
            stats_keep_days: 7,
            uv_keep_days: 7,
            batch_size: 1000,
            max_iterations: 100,
        }
    }
}

/// Consistency reconciler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Entities audited per tick.
    pub page_size: usize,
    /// Entities audited concurrently within a page.
    pub parallelism: usize,
    /// When `false`, passes only report drift.
    pub fix_enabled: bool,
    /// Classes visited in round-robin order, one page per tick.
    pub classes: Vec<DataClass>,
}

impl ReconcileConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero(self.interval_ms, "reconcile.interval_ms")?;
        require_nonzero(self.page_size as u64, "reconcile.page_size")?;
        require_nonzero(self.parallelism as u64, "reconcile.parallelism")
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30 * 60 * 1000,
            page_size: 100,
            parallelism: 8,
            fix_enabled: true,
            classes: DataClass::all(),
        }
    }
}

/// Cache-aside loader settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
    /// TTL for cached absences; 0 disables negative caching.
    pub negative_ttl_ms: u64,
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    #[must_use]
    pub fn negative_ttl(&self) -> Option<Duration> {
        (self.negative_ttl_ms > 0).then(|| Duration::from_millis(self.negative_ttl_ms))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero(self.ttl_ms, "cache.ttl_ms")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 3_000_000,
            negative_ttl_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use hotsync_core::{AggregateKind, RelationKind};

    use super::*;

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::default();
        assert!(config.streams.is_empty());
        assert!(config.archive.metrics.is_empty());
        assert_eq!(config.archive.browse_keep_days, 3);
        assert_eq!(config.archive.stats_keep_days, 7);
        assert_eq!(config.archive.uv_keep_days, 7);
        assert_eq!(config.reconcile.page_size, 100);
        assert_eq!(config.reconcile.classes.len(), 7);
        assert!(config.cache.negative_ttl().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_stream_falls_back_to_defaults() {
        let stream = EngineConfig::default().stream("likes");
        assert_eq!(stream.name, "likes");
        assert_eq!(stream.flush_delay(), Duration::from_secs(30));
        assert_eq!(stream.size_threshold, 100);
    }

    #[test]
    fn partial_json_overrides_single_fields() {
        let config = EngineConfig::from_json_str(
            r#"{
                "streams": [{ "name": "likes", "size_threshold": 3 }],
                "archive": { "metrics": ["post:view"] },
                "reconcile": { "classes": ["like", "comment_count"], "fix_enabled": false }
            }"#,
        )
        .unwrap();

        let likes = config.stream("likes");
        assert_eq!(likes.size_threshold, 3);
        assert_eq!(likes.flush_delay_ms, DEFAULT_FLUSH_DELAY_MS);
        assert_eq!(config.archive.metrics, vec!["post:view"]);
        assert_eq!(config.archive.batch_size, 1000);
        assert!(!config.reconcile.fix_enabled);
        assert_eq!(
            config.reconcile.classes,
            vec![
                DataClass::Relation(RelationKind::Like),
                DataClass::Aggregate(AggregateKind::CommentCount)
            ]
        );
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "streams": [{ "name": "x", "size_threshold": 0 }] }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroThreshold { stream } if stream == "x"));
    }

    #[test]
    fn zero_delay_is_rejected() {
        let mut config = StreamConfig::named("x");
        config.flush_delay_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroFlushDelay { .. })
        ));
    }

    #[test]
    fn duplicate_streams_are_rejected() {
        let config = EngineConfig {
            streams: vec![StreamConfig::named("a"), StreamConfig::named("a")],
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateStream(name)) if name == "a"
        ));
    }

    #[test]
    fn unknown_data_class_fails_to_parse() {
        let err = EngineConfig::from_json_str(r#"{ "reconcile": { "classes": ["likes"] } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "reconcile": { "page_size": 0 } }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ZeroValue { field: "reconcile.page_size" }
        ));
    }
}
