//! Object Store Abstraction
//!
//! The tailer consumes exactly two store operations:
//!
//! - `list(prefix, delimiter)`: with a delimiter, keys are rolled up into
//!   one-level common prefixes (each ending with the delimiter); without
//!   one, full keys under the prefix are returned.
//! - `get(key)`: the object's entire current content. No resume or offset
//!   support is assumed — every call re-reads from the start.
//!
//! Implementations:
//! - `InMemoryObjectStore`: for unit and integration tests
//! - `S3ObjectStore`: production (feature-gated, see `s3_store`)

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

/// Result of a list operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    /// One-level groupings of keys sharing a prefix up to the next
    /// delimiter (present only when a delimiter was given). Each entry
    /// includes the trailing delimiter.
    pub common_prefixes: Vec<String>,
    /// Full keys under the prefix that contain no further delimiter
    /// (or all matching keys, when no delimiter was given)
    pub keys: Vec<String>,
}

/// Object store abstraction trait
pub trait ObjectStore: Send + Sync + 'static {
    /// List keys under a prefix, optionally grouped at the next delimiter
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<char>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>>;

    /// Fetch an object's entire current content
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>>;
}

/// Roll keys up into a `ListResult` the way a delimiter-aware store would.
///
/// `keys` must already be filtered to the prefix. Shared by the in-memory
/// store and the S3 backend (whose underlying client only groups on `/`,
/// not on arbitrary delimiters).
pub(crate) fn group_by_delimiter<'a, I>(
    prefix: &str,
    delimiter: Option<char>,
    keys: I,
) -> ListResult
where
    I: IntoIterator<Item = &'a str>,
{
    let mut result = ListResult::default();
    let Some(delim) = delimiter else {
        result.keys = keys.into_iter().map(str::to_string).collect();
        result.keys.sort_unstable();
        result.keys.dedup();
        return result;
    };

    for key in keys {
        let rest = &key[prefix.len()..];
        match rest.find(delim) {
            Some(pos) => {
                let group = &key[..prefix.len() + pos + delim.len_utf8()];
                // listings are sorted, so duplicates arrive adjacent
                if result.common_prefixes.last().map(String::as_str) != Some(group) {
                    result.common_prefixes.push(group.to_string());
                }
            }
            None => result.keys.push(key.to_string()),
        }
    }
    result.common_prefixes.sort_unstable();
    result.common_prefixes.dedup();
    result.keys.sort_unstable();
    result.keys.dedup();
    result
}

/// In-memory object store for tests
///
/// Clones share the same underlying map, so a test can keep writing while
/// a tailer reads. `fail_lists` turns every list call into an error, for
/// exercising discovery failure policies.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    fail_lists: bool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite an object
    pub fn put(&self, key: &str, data: &[u8]) {
        self.inner.write().objects.insert(key.to_string(), data.to_vec());
    }

    /// Append one line (a trailing newline is added) to an object,
    /// creating it if absent
    pub fn append_line(&self, key: &str, line: &str) {
        let mut inner = self.inner.write();
        let obj = inner.objects.entry(key.to_string()).or_default();
        obj.extend_from_slice(line.as_bytes());
        obj.push(b'\n');
    }

    /// Make every subsequent list call fail (until cleared)
    pub fn set_fail_lists(&self, fail: bool) {
        self.inner.write().fail_lists = fail;
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().objects.is_empty()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<char>,
    ) -> Pin<Box<dyn Future<Output = IoResult<ListResult>> + Send + 'a>> {
        Box::pin(async move {
            let inner = self.inner.read();
            if inner.fail_lists {
                return Err(IoError::new(ErrorKind::Other, "injected list failure"));
            }
            Ok(group_by_delimiter(
                prefix,
                delimiter,
                inner
                    .objects
                    .range(prefix.to_string()..)
                    .map(|(k, _)| k.as_str())
                    .take_while(|k| k.starts_with(prefix)),
            ))
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.inner
                .read()
                .objects
                .get(key)
                .cloned()
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("no such key: {}", key)))
        })
    }
}
