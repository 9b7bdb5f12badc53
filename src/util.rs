//! Timestamp normalization helpers.
//!
//! Messages arrive either from the HTTP payload or from datastore rows and
//! their timestamps come in several shapes: RFC 3339 strings, naive ISO 8601
//! strings without an offset, or a Unix epoch number. Everything is folded
//! into a `DateTime<FixedOffset>` so the original offset survives rendering.
//! Input that cannot be understood is replaced with the current time instead
//! of failing the whole message.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Epoch values above this are treated as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 2e10;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub type Timestamp = DateTime<FixedOffset>;

pub fn now() -> Timestamp {
    Utc::now().fixed_offset()
}

/// Parse a timestamp, returning `None` when the value is not recognisable.
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

/// Like [`parse_timestamp`] but never fails: unknown input becomes "now".
pub fn normalize_timestamp(value: &Value) -> Timestamp {
    parse_timestamp(value).unwrap_or_else(|| {
        tracing::debug!(raw = %value, "unparseable timestamp, using current time");
        now()
    })
}

fn parse_timestamp_str(s: &str) -> Option<Timestamp> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Some(dt) = parse_postgres(s) {
        return Some(dt);
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc().fixed_offset());
    }
    if let Ok(epoch) = s.parse::<f64>() {
        return from_epoch(epoch);
    }
    None
}

/// Postgres renders `timestamptz` as `2024-01-01 10:00:00.123+00`: a space
/// separator and an hour-only offset, both rejected by RFC 3339.
fn parse_postgres(s: &str) -> Option<Timestamp> {
    let mut candidate = s.replacen(' ', "T", 1);
    let bytes = candidate.as_bytes();
    if bytes.len() > 3 {
        let sign = bytes[bytes.len() - 3];
        let hour_only = (sign == b'+' || sign == b'-')
            && bytes[bytes.len() - 2..].iter().all(u8::is_ascii_digit);
        if hour_only {
            candidate.push_str(":00");
        }
    }
    DateTime::parse_from_rfc3339(&candidate).ok()
}

fn from_epoch(raw: f64) -> Option<Timestamp> {
    if !raw.is_finite() {
        return None;
    }
    let secs = if raw.abs() > EPOCH_MILLIS_THRESHOLD {
        raw / 1000.0
    } else {
        raw
    };
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999))
        .single()
        .map(|dt| dt.fixed_offset())
}

/// serde adapter for message timestamps. Datastore rows also pair it with
/// `#[serde(default = "util::now")]`; request messages must carry the field.
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(normalize_timestamp(&raw))
}
