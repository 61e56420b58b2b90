//! Query Parameter Normalization
//!
//! Listing endpoints are lenient: a missing or unusable parameter falls back
//! to its default instead of rejecting the request.

use chrono::{DateTime, Utc};

/// Default page size for sensor listings
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Default number of records for range queries
pub const DEFAULT_RECORD_LIMIT: u32 = 100;

/// Upper bound on records returned by a single range query
pub const MAX_RECORD_LIMIT: u32 = 1000;

/// Limit/offset paging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Build a page from raw query values.
    ///
    /// `limit` must be positive and `offset` non-negative, otherwise the
    /// default is used.
    pub fn from_params(limit: Option<&str>, offset: Option<&str>) -> Self {
        let limit = limit
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT);
        let offset = offset
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);

        Self { limit, offset }
    }
}

/// Record limit for range queries, clamped to [`MAX_RECORD_LIMIT`]
pub fn record_limit(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_RECORD_LIMIT)
        .min(MAX_RECORD_LIMIT)
}

/// Time window for range queries; `start` is inclusive, `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Resolve a window from optional RFC 3339 bounds.
    ///
    /// Defaults: start = Unix epoch, end = `now`.
    pub fn resolve(start: Option<&str>, end: Option<&str>, now: DateTime<Utc>) -> Self {
        let start = start.and_then(parse_rfc3339).unwrap_or(DateTime::UNIX_EPOCH);
        let end = end.and_then(parse_rfc3339).unwrap_or(now);
        Self { start, end }
    }
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
