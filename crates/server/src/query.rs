//! Query-string parsing for the read endpoints
//!
//! Empty parameters are treated as absent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use sphere_core::{EventFilter, ValidationError};

pub const DEFAULT_RECENT_LIMIT: usize = 20;

#[derive(Debug, Default, Deserialize)]
pub struct RecentParams {
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    pub level: Option<String>,
    pub source: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub file_hash: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

/// `limit` must be a non-negative integer; larger than `cap` is clamped
pub fn parse_limit(raw: Option<&str>, default: usize, cap: usize) -> Result<usize, ValidationError> {
    let limit = match raw {
        None => default,
        Some(s) => s
            .trim()
            .parse::<usize>()
            .map_err(|_| ValidationError::InvalidLimit { param: "limit" })?,
    };
    Ok(limit.min(cap))
}

/// Accepts RFC 3339, naive `T`/space separated datetimes (UTC), or a bare date
pub fn parse_timestamp(param: &'static str, raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(ValidationError::InvalidTimestamp { param })
}

impl RecentParams {
    pub fn limit(&self, cap: usize) -> Result<usize, ValidationError> {
        parse_limit(non_empty(&self.limit), DEFAULT_RECENT_LIMIT, cap)
    }
}

impl FilterParams {
    pub fn to_filter(&self) -> Result<EventFilter, ValidationError> {
        Ok(EventFilter {
            level: non_empty(&self.level).map(str::to_string),
            source: non_empty(&self.source).map(str::to_string),
            from: non_empty(&self.from)
                .map(|s| parse_timestamp("from", s))
                .transpose()?,
            to: non_empty(&self.to)
                .map(|s| parse_timestamp("to", s))
                .transpose()?,
            file_hash: non_empty(&self.file_hash).map(str::to_string),
        })
    }
}
