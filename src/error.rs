//! Error Taxonomy for Tailing
//!
//! Four failure classes, each scoped to what it actually halts:
//!
//! - `List`: a prefix listing failed — aborts the whole search, no partial
//!   results.
//! - `Read`: fetching one file's content failed — that cycle only; the next
//!   poll tick retries naturally.
//! - `Parse`: a malformed JSON line — surfaced as an event, then skipped.
//!   The line still counts against the file offset, so it is reported once.
//! - `KeyFormat`: a listed key does not match the log naming pattern —
//!   recoverable, skip-and-log.

use std::io::Error as IoError;

/// Error type for tail operations
#[derive(Debug)]
pub enum TailError {
    /// Object store list call failed
    List(IoError),
    /// Object store get call failed for a file
    Read { key: String, source: IoError },
    /// A line failed to parse as JSON
    Parse { key: String, line: u64, source: serde_json::Error },
    /// A listed key does not match the expected naming pattern
    KeyFormat(String),
}

impl std::fmt::Display for TailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TailError::List(e) => write!(f, "List failed: {}", e),
            TailError::Read { key, source } => write!(f, "Read failed for {}: {}", key, source),
            TailError::Parse { key, line, source } => {
                write!(f, "Bad JSON at {}:{}: {}", key, line, source)
            }
            TailError::KeyFormat(key) => write!(f, "Key does not match log pattern: {}", key),
        }
    }
}

impl std::error::Error for TailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TailError::List(e) => Some(e),
            TailError::Read { source, .. } => Some(source),
            TailError::Parse { source, .. } => Some(source),
            TailError::KeyFormat(_) => None,
        }
    }
}
