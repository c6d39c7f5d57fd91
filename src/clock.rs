//! Clock Abstraction
//!
//! All emission decisions compare "now" against record timestamps, so time
//! goes through a trait rather than `SystemTime` calls scattered around.
//!
//! Implementations:
//! - `WallClock`: production. Anchored to a `tokio::time::Instant`, so under
//!   `tokio::test(start_paused = true)` it advances in lockstep with the
//!   runtime's timers.
//! - `ManualClock`: fully controlled time for synchronous unit tests.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Clock trait for time decisions
pub trait TailClock: Send + Sync + Clone + 'static {
    /// Current time as Unix milliseconds
    fn now_ms(&self) -> i64;

    /// Current time as a UTC datetime
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Production clock anchored to the tokio runtime's notion of time
#[derive(Clone)]
pub struct WallClock {
    start: Instant,
    start_ms: i64,
}

impl WallClock {
    /// Anchor to the current system time. Must be called inside a runtime.
    pub fn new() -> Self {
        WallClock {
            start: Instant::now(),
            start_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Anchor to a chosen epoch. With a paused runtime this makes every
    /// timer-driven time observation deterministic.
    pub fn anchored(start_ms: i64) -> Self {
        WallClock {
            start: Instant::now(),
            start_ms,
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TailClock for WallClock {
    fn now_ms(&self) -> i64 {
        self.start_ms + self.start.elapsed().as_millis() as i64
    }
}

/// Manually advanced clock for unit tests
#[derive(Clone)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        ManualClock {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl TailClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
