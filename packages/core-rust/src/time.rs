//! Wall-clock helpers shared by the archiver and the stores.
//!
//! All timestamps are milliseconds since the Unix epoch. Date buckets are
//! `yyyyMMdd` strings interpreted in UTC.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;

/// Milliseconds in one calendar day.
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

const DATE_BUCKET_FORMAT: &str = "%Y%m%d";

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Cut-off timestamp for data kept `keep_days` days: anything at or before
/// the returned instant is due for archiving.
#[must_use]
pub fn retention_horizon(now: i64, keep_days: u32) -> i64 {
    now - i64::from(keep_days) * MILLIS_PER_DAY
}

#[must_use]
pub fn format_date_bucket(date: NaiveDate) -> String {
    date.format(DATE_BUCKET_FORMAT).to_string()
}

#[must_use]
pub fn parse_date_bucket(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_BUCKET_FORMAT).ok()
}

/// Midnight UTC of `date`, in epoch millis.
#[must_use]
pub fn date_bucket_start(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map_or(0, |dt| dt.and_utc().timestamp_millis())
}

/// The UTC date bucket containing `millis`.
#[must_use]
pub fn date_bucket_of(millis: i64) -> Option<NaiveDate> {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}
