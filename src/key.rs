//! Log File Key Naming
//!
//! Files are named `YYYY-MM-DD-HH-MM-{host}.log`: five zero-padded numeric
//! fields at minute resolution, then the host identifier (which carries the
//! stage as its `-{stage}` suffix), then the `.log` extension. Zero padding
//! makes lexicographic order equal chronological-then-host order, which the
//! whole key-space search leans on.

use crate::error::TailError;
use chrono::{DateTime, Utc};

/// `strftime`-style pattern for the minute-resolution key prefix
pub const MINUTE_FORMAT: &str = "%Y-%m-%d-%H-%M";

/// A minute prefix guaranteed to sort after any real key
pub const FAR_FUTURE: &str = "9000-01-01-00-00";

/// Format a UTC instant as a minute prefix
pub fn format_minute(at: DateTime<Utc>) -> String {
    at.format(MINUTE_FORMAT).to_string()
}

/// A parsed log file key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogFileKey {
    key: String,
    minute_len: usize,
    host_start: usize,
}

impl LogFileKey {
    /// Parse a store key against `^\d+-\d+-\d+-\d+-\d+-(.+)\.log$`.
    ///
    /// The five leading fields form the minute prefix; the captured group is
    /// the host id.
    pub fn parse(key: &str) -> Result<LogFileKey, TailError> {
        let bad = || TailError::KeyFormat(key.to_string());
        let stem = key.strip_suffix(".log").ok_or_else(bad)?;

        let mut fields = 0usize;
        let mut minute_len = 0usize;
        for (i, seg) in stem.split('-').enumerate() {
            if seg.is_empty() || !seg.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            minute_len = if i == 0 { seg.len() } else { minute_len + 1 + seg.len() };
            fields += 1;
            if fields == 5 {
                break;
            }
        }
        if fields != 5 || minute_len + 1 >= stem.len() {
            return Err(bad());
        }

        Ok(LogFileKey {
            key: key.to_string(),
            minute_len,
            host_start: minute_len + 1,
        })
    }

    /// The full store key
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The minute prefix (first five dash-separated fields)
    pub fn minute(&self) -> &str {
        &self.key[..self.minute_len]
    }

    /// The host id (everything between the minute prefix and `.log`)
    pub fn host(&self) -> &str {
        &self.key[self.host_start..self.key.len() - ".log".len()]
    }

    /// Whether the filename minus `.log` ends with `-{stage}`
    pub fn matches_stage(&self, stage: &str) -> bool {
        let stem = &self.key[..self.key.len() - ".log".len()];
        stem.len() > stage.len()
            && stem.ends_with(stage)
            && stem.as_bytes()[stem.len() - stage.len() - 1] == b'-'
    }
}

impl std::fmt::Display for LogFileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Truncated-string range test for a candidate prefix.
///
/// Because fields are zero-padded and the encoding is lexicographically
/// monotonic, comparing the prefix against `from`/`to` clamped to the
/// prefix length never excludes an in-range leaf and never admits one
/// entirely outside the range.
pub fn prefix_in_range(from: &str, prefix: &str, to: &str) -> bool {
    let p = prefix.as_bytes();
    let lo = &from.as_bytes()[..from.len().min(p.len())];
    let hi = &to.as_bytes()[..to.len().min(p.len())];
    p >= lo && p <= hi
}
