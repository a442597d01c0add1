//! Hot-store key layout.
//!
//! Relation sets live under [`RelationKind::set_prefix`], ranking counters under
//! [`AggregateKind::ranking_key`](crate::types::AggregateKind::ranking_key).
//! The archive sources below are discovered by prefix scan.

use chrono::NaiveDate;

use crate::time::{format_date_bucket, parse_date_bucket};
use crate::types::{EntityId, RelationKind};

/// Sorted set per user: member = post id, score = browse time (millis).
pub const BROWSE_HISTORY_PREFIX: &str = "browse:history:user:";

/// Sorted set per metric: member = observed value, score = timestamp (millis).
pub const WINDOW_STATS_PREFIX: &str = "stats:window:";

/// Plain set per resource and day: members = visitor ids.
/// Layout: `uv:daily:{resource_type}:{resource_id}:{yyyyMMdd}`.
pub const UV_DAILY_PREFIX: &str = "uv:daily:";

#[must_use]
pub fn relation_set_key(kind: RelationKind, subject: EntityId) -> String {
    format!("{}{subject}", kind.set_prefix())
}

#[must_use]
pub fn browse_history_key(user_id: EntityId) -> String {
    format!("{BROWSE_HISTORY_PREFIX}{user_id}")
}

#[must_use]
pub fn parse_browse_history_key(key: &str) -> Option<EntityId> {
    key.strip_prefix(BROWSE_HISTORY_PREFIX)?.parse().ok()
}

/// `metric` may carry a dynamic suffix (`post:view:123`); the allow-list
/// names only the base (`post:view`).
#[must_use]
pub fn window_stats_key(metric: &str) -> String {
    format!("{WINDOW_STATS_PREFIX}{metric}")
}

#[must_use]
pub fn parse_window_stats_key(key: &str) -> Option<&str> {
    key.strip_prefix(WINDOW_STATS_PREFIX).filter(|m| !m.is_empty())
}

/// Components of a daily unique-visitor key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UvKey {
    pub resource_type: String,
    pub resource_id: EntityId,
    pub date: NaiveDate,
}

#[must_use]
pub fn uv_daily_key(resource_type: &str, resource_id: EntityId, date: NaiveDate) -> String {
    format!(
        "{UV_DAILY_PREFIX}{resource_type}:{resource_id}:{}",
        format_date_bucket(date)
    )
}

/// Parses `uv:daily:{type}:{id}:{yyyyMMdd}`. The resource type itself may not
/// contain `:`.
#[must_use]
pub fn parse_uv_daily_key(key: &str) -> Option<UvKey> {
    let rest = key.strip_prefix(UV_DAILY_PREFIX)?;
    let mut parts = rest.split(':');
    let resource_type = parts.next().filter(|t| !t.is_empty())?;
    let resource_id = parts.next()?.parse().ok()?;
    let date = parse_date_bucket(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some(UvKey {
        resource_type: resource_type.to_string(),
        resource_id,
        date,
    })
}

/// Key under which the cache-aside loader stores a value.
#[must_use]
pub fn cache_key(prefix: &str, key: &str) -> String {
    format!("{prefix}:{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_keys_use_kind_prefix() {
        assert_eq!(relation_set_key(RelationKind::Like, 9), "post:like:9");
        assert_eq!(relation_set_key(RelationKind::Block, 3), "user:blacklist:3");
    }

    #[test]
    fn browse_history_key_parses_user() {
        assert_eq!(parse_browse_history_key(&browse_history_key(77)), Some(77));
        assert_eq!(parse_browse_history_key("browse:history:user:abc"), None);
        assert_eq!(parse_browse_history_key("stats:window:x"), None);
    }

    #[test]
    fn window_stats_key_keeps_suffix() {
        let key = window_stats_key("post:view:123");
        assert_eq!(parse_window_stats_key(&key), Some("post:view:123"));
        assert_eq!(parse_window_stats_key(WINDOW_STATS_PREFIX), None);
    }

    #[test]
    fn uv_key_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let key = uv_daily_key("post", 123, date);
        assert_eq!(key, "uv:daily:post:123:20240101");
        let parsed = parse_uv_daily_key(&key).unwrap();
        assert_eq!(parsed.resource_type, "post");
        assert_eq!(parsed.resource_id, 123);
        assert_eq!(parsed.date, date);
    }

    #[test]
    fn uv_key_rejects_bad_layouts() {
        assert!(parse_uv_daily_key("uv:daily:post:123").is_none());
        assert!(parse_uv_daily_key("uv:daily:post:x:20240101").is_none());
        assert!(parse_uv_daily_key("uv:daily::1:20240101").is_none());
        assert!(parse_uv_daily_key("uv:daily:post:1:20240101:extra").is_none());
    }
}
