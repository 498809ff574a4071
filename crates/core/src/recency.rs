//! Recency ordering for job records.
//!
//! Timestamps arrive in whatever form the remote service emits them. They
//! are kept verbatim on the record and only parsed here, when the registry
//! needs an ordering key. Anything that cannot be parsed sorts as the
//! epoch (`0`), i.e. oldest.

use chrono::{DateTime, NaiveDateTime};

use crate::types::EpochMillis;

/// Naive formats accepted in addition to RFC 3339. Interpreted as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a wire timestamp into epoch milliseconds.
///
/// Accepts, in order:
/// - a bare integer, taken as epoch milliseconds;
/// - an RFC 3339 timestamp (`2024-05-01T10:00:00Z`, `...+02:00`);
/// - a naive `YYYY-MM-DD HH:MM:SS[.fff]` (space or `T` separated), as UTC.
///
/// Returns `0` for anything else.
pub fn parse_epoch_millis(raw: &str) -> EpochMillis {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }

    if let Ok(millis) = raw.parse::<i64>() {
        return millis;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.timestamp_millis();
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
        .unwrap_or(0)
}

/// Recency key over the three optional timestamps of a job.
///
/// The first timestamp that is *present* wins (`created ?? started ??
/// finished`), even if it turns out to be unparsable.
pub fn recency_key(
    created_at: Option<&str>,
    started_at: Option<&str>,
    finished_at: Option<&str>,
) -> EpochMillis {
    created_at
        .or(started_at)
        .or(finished_at)
        .map(parse_epoch_millis)
        .unwrap_or(0)
}
