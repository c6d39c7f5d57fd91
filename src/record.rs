//! Log Records
//!
//! One record per newline-delimited JSON line. The optional `timestamp`
//! field drives ordered emission; records without one are ordering-exempt
//! and bypass the delay gate (see `merge`).

use chrono::{DateTime, NaiveDateTime};
use memchr::memchr;
use serde_json::Value;

/// A parsed log line
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Embedded timestamp as Unix milliseconds, if the line carried one
    pub timestamp_ms: Option<i64>,
    /// The full JSON object
    pub value: Value,
}

/// The `timestamp` field of a parsed line.
///
/// Mirrors the loose upstream convention: a missing, null, empty-string,
/// zero, or `false` field means "no timestamp"; a present value that
/// cannot be read as an instant poisons the record (the record is dropped,
/// not reordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimestampField {
    Absent,
    At(i64),
    Unparseable,
}

pub(crate) fn timestamp_field(value: &Value) -> TimestampField {
    match value.get("timestamp") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => TimestampField::Absent,
        Some(Value::String(s)) if s.is_empty() => TimestampField::Absent,
        Some(Value::String(s)) => parse_instant(s)
            .map(TimestampField::At)
            .unwrap_or(TimestampField::Unparseable),
        Some(Value::Number(n)) => match n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
            Some(0) | None => TimestampField::Absent,
            Some(ms) => TimestampField::At(ms),
        },
        Some(_) => TimestampField::Unparseable,
    }
}

/// Parse a date-time string to Unix milliseconds. RFC 3339 first, then a
/// naive `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as UTC).
fn parse_instant(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    None
}

/// Split on `\n`, yielding non-empty lines (a trailing `\r` is trimmed).
/// Line numbering for offset bookkeeping counts exactly these.
pub(crate) fn split_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = data;
    std::iter::from_fn(move || {
        while !rest.is_empty() {
            let (line, tail) = match memchr(b'\n', rest) {
                Some(pos) => (&rest[..pos], &rest[pos + 1..]),
                None => (rest, &rest[rest.len()..]),
            };
            rest = tail;
            let line = match line.last() {
                Some(b'\r') => &line[..line.len() - 1],
                _ => line,
            };
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    })
}
