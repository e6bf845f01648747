//! Time related utils.

use crate::{Error, Result};
use chrono::{NaiveDateTime, TimeZone, Utc};

/// The timestamp type used across the crate.
pub type DateTime = chrono::DateTime<Utc>;

/// Return the current time.
pub fn now() -> DateTime {
    Utc::now()
}

/// Format a timestamp as the eight digit `YYYYMMDD` date used in the
/// credential scope.
pub fn format_date(t: DateTime) -> String {
    t.format("%Y%m%d").to_string()
}

/// Format a timestamp as `YYYYMMDDTHHMMSSZ`, the `x-amz-date` form.
pub fn format_iso8601(t: DateTime) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Parse an RFC3339 timestamp like `2019-11-09T13:34:41Z`.
///
/// STS and the metadata services report credential expiration in this form.
pub fn parse_rfc3339(s: &str) -> Result<DateTime> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            Error::unexpected(format!("failed to parse timestamp {s}")).with_source(e)
        })
}

/// Parse a `YYYYMMDDTHHMMSSZ` timestamp, the form accepted by the
/// `AWS_TIMESTAMP` fixed-clock hook and presign start dates.
pub fn parse_amz_timestamp(s: &str) -> Result<DateTime> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%SZ")
        .map_err(|e| Error::invalid_argument(format!("bad timestamp {s}")).with_source(e))?;
    Ok(Utc.from_utc_datetime(&naive))
}
