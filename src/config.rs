//! Tailer Configuration
//!
//! Every tunable the components read lives here and is injected
//! explicitly, so tests can run against a fake store with fast intervals
//! and a controlled clock.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a live tail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    /// Stage label; only files whose name (minus `.log`) ends with
    /// `-{stage}` are tailed
    pub stage: String,
    /// Interval between discovery polls and between re-reads of each
    /// active file (default: 5000 ms)
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
    /// Minimum age a timestamped record must reach before it becomes
    /// eligible for emission; records are held for twice this window
    /// (default: 20000 ms)
    #[serde(with = "duration_millis")]
    pub delay_window: Duration,
    /// Emission is suppressed for this long after startup while reads are
    /// in flight, so the initial backlog can settle (default: 60000 ms)
    #[serde(with = "duration_millis")]
    pub warmup: Duration,
    /// How far before the requested start discovery looks, since a file's
    /// content can lag its name (default: 1 hour)
    #[serde(with = "duration_millis")]
    pub lookback: Duration,
    /// Ceiling on simultaneous list requests within one search
    /// (default: 12)
    pub list_concurrency: usize,
    /// What to do when a discovery search fails
    pub on_discovery_error: DiscoveryErrorPolicy,
}

impl Default for TailConfig {
    fn default() -> Self {
        TailConfig {
            stage: "prod".to_string(),
            poll_interval: Duration::from_millis(5_000),
            delay_window: Duration::from_millis(20_000),
            warmup: Duration::from_millis(60_000),
            lookback: Duration::from_secs(3_600),
            list_concurrency: 12,
            on_discovery_error: DiscoveryErrorPolicy::Halt,
        }
    }
}

impl TailConfig {
    /// Configuration for tests (short intervals, no warm-up inertia)
    pub fn test(stage: &str) -> Self {
        TailConfig {
            stage: stage.to_string(),
            poll_interval: Duration::from_millis(100),
            delay_window: Duration::from_millis(200),
            warmup: Duration::from_millis(500),
            lookback: Duration::from_secs(3_600),
            list_concurrency: 4,
            on_discovery_error: DiscoveryErrorPolicy::Halt,
        }
    }
}

/// Policy applied after a discovery search error.
///
/// The poller never retries a failed search on its own tick schedule:
/// `Halt` (the default) stops polling entirely and leaves intervention to
/// the caller, avoiding retry storms against a failing backend. `Retry`
/// re-polls after a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DiscoveryErrorPolicy {
    /// Emit the error and stop polling
    Halt,
    /// Emit the error, wait out the backoff, and keep polling
    Retry {
        #[serde(with = "duration_millis")]
        backoff: Duration,
    },
}

/// Which store backend to tail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (tests only)
    InMemory,
    /// Amazon S3 or compatible
    #[cfg(feature = "s3")]
    S3(S3Config),
}

/// S3 connection settings
#[cfg(feature = "s3")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
    /// Key prefix within the bucket under which log files live
    pub prefix: Option<String>,
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
