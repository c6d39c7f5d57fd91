//! Hierarchical Key-Space Search
//!
//! Locates log file keys matching a minute-resolution range and a stage
//! label without enumerating the whole store. The key namespace is a
//! five-level `-`-delimited hierarchy (year, month, day, hour, minute);
//! each level lists the immediate child prefixes of the survivors from the
//! previous level, keeping those that pass the truncated range comparison.
//! A final delimiter-free round lists full keys under the surviving minute
//! prefixes and applies the stage suffix predicate.
//!
//! List requests at every round run with a bounded fan-out, so total
//! outstanding calls never exceed the ceiling and cost scales with the
//! number of matching date branches, not with store size.
//!
//! Any failed list call aborts the whole search; no partial results.

use crate::error::TailError;
use crate::key::{prefix_in_range, LogFileKey};
use crate::store::{ListResult, ObjectStore};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::warn;

/// Levels in the date hierarchy: year, month, day, hour, minute
const HIERARCHY_LEVELS: usize = 5;

/// Delimiter between key fields
const DELIMITER: char = '-';

/// Gather one list result per input prefix, at most `concurrency` calls in
/// flight. Results arrive in completion order; callers re-sort.
async fn list_each<S>(
    store: &S,
    prefixes: Vec<String>,
    delimiter: Option<char>,
    concurrency: usize,
) -> Result<Vec<ListResult>, TailError>
where
    S: ObjectStore + ?Sized,
{
    stream::iter(prefixes)
        .map(|prefix| async move { store.list(&prefix, delimiter).await })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await
        .map_err(TailError::List)
}

/// Find all log file keys whose minute prefix falls in `[from, to]` and
/// whose name carries the `-{stage}` suffix.
///
/// `from` and `to` are minute prefixes (`YYYY-MM-DD-HH-MM`); the result is
/// sorted and deduplicated. Keys that fail the naming pattern are skipped
/// with a warning.
pub async fn search<S>(
    store: &S,
    from: &str,
    to: &str,
    stage: &str,
    concurrency: usize,
) -> Result<Vec<LogFileKey>, TailError>
where
    S: ObjectStore + ?Sized,
{
    let mut prefixes = vec![String::new()];

    for _level in 0..HIERARCHY_LEVELS {
        let listings = list_each(store, prefixes, Some(DELIMITER), concurrency).await?;
        let mut survivors = Vec::new();
        for listing in listings {
            survivors.extend(
                listing
                    .common_prefixes
                    .into_iter()
                    .filter(|p| prefix_in_range(from, p, to)),
            );
        }
        survivors.sort_unstable();
        survivors.dedup();
        if survivors.is_empty() {
            return Ok(Vec::new());
        }
        prefixes = survivors;
    }

    // Stage pass over full keys. A delimiter'd rollup stops at the first
    // `-` inside the host id, so the `-{stage}` suffix is only visible at
    // filename granularity.
    let listings = list_each(store, prefixes, None, concurrency).await?;
    let mut found = Vec::new();
    for listing in listings {
        for key in listing.keys {
            match LogFileKey::parse(&key) {
                Ok(parsed) => {
                    if parsed.matches_stage(stage) {
                        found.push(parsed);
                    }
                }
                Err(_) => warn!(key = %key, "skipping key outside log naming pattern"),
            }
        }
    }
    found.sort_unstable();
    found.dedup();
    Ok(found)
}
