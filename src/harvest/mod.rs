//! Harvest query builder
//!
//! Translates a time-ranged, paginated retrieval request into store
//! range-scan parameters. All parameter validation happens here, before any
//! store call; the store's by-timestamp index scans by integer epoch
//! seconds, not by timestamp string.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::store::ScanParams;
use crate::types::{ArchwayError, Result};

/// Default page size for harvest listings.
pub const DEFAULT_PAGE_SIZE: u64 = 25;

const INCLUDE_DOCS: &str = "include_docs";
const FROM: &str = "from";
const UNTIL: &str = "until";
const PAGE: &str = "page";

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub page_size: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Parse an ISO-8601 timestamp, accepting full RFC 3339, a naive datetime,
/// or a bare date (midnight UTC).
fn parse_iso8601(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Build range-scan parameters from raw query parameters.
///
/// Rules, in order: `include_docs` must be a JSON boolean token when
/// present; `from` defaults to the minimum representable timestamp and
/// `until` to now, both ISO-8601; bounds convert to epoch seconds; an
/// inverted range is rejected; `page` must be a non-negative integer and
/// converts to a `skip` offset.
pub fn build_query(params: &HashMap<String, String>, config: &HarvestConfig) -> Result<ScanParams> {
    let include_docs = match params.get(INCLUDE_DOCS) {
        None => false,
        Some(raw) => serde_json::from_str::<bool>(raw).map_err(|_| {
            ArchwayError::MalformedBody("Invalid JSON for include_docs".into())
        })?,
    };

    let start_key = match params.get(FROM) {
        None => DateTime::<Utc>::MIN_UTC.timestamp(),
        Some(raw) => parse_iso8601(raw)
            .ok_or_else(|| {
                ArchwayError::InvalidTimeRange("Invalid from time, must be ISO 8601 format".into())
            })?
            .timestamp(),
    };

    let end_key = match params.get(UNTIL) {
        None => Utc::now().timestamp(),
        Some(raw) => parse_iso8601(raw)
            .ok_or_else(|| {
                ArchwayError::InvalidTimeRange("Invalid until time, must be ISO 8601 format".into())
            })?
            .timestamp(),
    };

    if end_key < start_key {
        return Err(ArchwayError::InvalidTimeRange(
            "From date cannot come after until date".into(),
        ));
    }

    let skip = match params.get(PAGE) {
        None => None,
        Some(raw) => {
            let page: u64 = raw.parse().map_err(|_| ArchwayError::InvalidPage)?;
            let skip = page
                .checked_mul(config.page_size)
                .ok_or(ArchwayError::InvalidPage)?;
            Some(skip)
        }
    };

    Ok(ScanParams {
        start_key,
        end_key,
        skip,
        limit: config.page_size,
        include_docs,
    })
}
