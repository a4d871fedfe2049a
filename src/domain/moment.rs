use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid moment '{input}': expected YYYY-MM-DD or RFC 3339")]
pub struct ParseMomentError {
    pub input: String,
}

/// Encode a moment for storage.
///
/// The encoding is fixed-width (`2024-01-02T08:30:00.000000Z`), so comparing
/// the stored text compares the instants, and its first ten characters are
/// the UTC calendar day.
pub fn encode_moment(moment: DateTime<Utc>) -> String {
    moment.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a stored moment. Accepts any RFC 3339 offset.
pub fn decode_moment(stored: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(stored).map(|dt| dt.with_timezone(&Utc))
}

/// The `YYYY-MM-DD` key used for day-granularity filtering.
pub fn day_key(moment: DateTime<Utc>) -> String {
    moment.date_naive().format("%Y-%m-%d").to_string()
}

/// Parse user input as either a calendar day (midnight UTC) or a full RFC 3339 instant.
pub fn parse_moment(input: &str) -> Result<DateTime<Utc>, ParseMomentError> {
    let input = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    decode_moment(input).map_err(|_| ParseMomentError {
        input: input.to_string(),
    })
}
