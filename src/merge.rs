//! Merge Stream
//!
//! Subscribes to file discoveries, tails each active file, and emits
//! records in a globally time-ordered sequence subject to a bounded delay.
//!
//! ```text
//! FilePoller ──discoveries──┐
//!                           ▼
//! read cycle (per file) ─► MergeActor ─► events (file / record / error)
//!        ▲                    │
//!        └──── CycleDue ◄─────┘  (rescheduled every poll interval)
//! ```
//!
//! All mutable state (host map, per-file offsets, pending buffer) is owned
//! by one actor; read cycles are one-shot tasks that report back over the
//! actor's own channel. A file has at most one cycle in flight, so offsets
//! advance strictly sequentially and no line is consumed twice.
//!
//! ## Emission
//!
//! The store offers no append-aware reads, so each cycle re-reads a file's
//! whole content and skips the lines already counted. Parsed records sit
//! in a pending buffer that is re-sorted by timestamp after every cycle; a
//! timestamped record is emitted once it is older than twice the delay
//! window, giving slower in-flight sources a full window to catch up.
//! Untimestamped records are ordering-exempt and flush immediately. No
//! emission happens during the warm-up period while reads are in flight,
//! so the initial multi-host backlog cannot be declared ordered too early.

use crate::clock::TailClock;
use crate::config::TailConfig;
use crate::discovery::{DiscoveryEvent, FilePoller};
use crate::error::TailError;
use crate::key::LogFileKey;
use crate::record::{split_lines, timestamp_field, Record, TimestampField};
use crate::store::ObjectStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Events delivered to the consumer, in decided order
#[derive(Debug)]
pub enum TailEvent {
    /// A newly discovered file (relayed from discovery)
    File(LogFileKey),
    /// One emitted record
    Record(Record),
    /// A discovery or read failure
    Error(TailError),
}

/// Handle to a running merge stream
pub struct TailHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl TailHandle {
    /// Stop the stream and wait for its tasks to wind down
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.join.await;
    }
}

/// A live, approximately time-ordered tail over every matching log file
pub struct MergeStream;

impl MergeStream {
    /// Start tailing records at `start`. Discovery looks back a further
    /// `config.lookback`, since a file's content can lag its name.
    pub fn spawn<S, C>(
        store: Arc<S>,
        clock: C,
        config: TailConfig,
        start: DateTime<Utc>,
    ) -> (TailHandle, mpsc::UnboundedReceiver<TailEvent>)
    where
        S: ObjectStore + ?Sized,
        C: TailClock,
    {
        let discovery_since =
            start - chrono::Duration::milliseconds(config.lookback.as_millis() as i64);
        let (poller, discoveries) =
            FilePoller::spawn(store.clone(), clock.clone(), config.clone(), discovery_since);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let actor = MergeActor {
            store,
            clock,
            floor_ms: start.timestamp_millis(),
            active: HashMap::new(),
            polled: HashSet::new(),
            in_flight: HashSet::new(),
            due_again: HashSet::new(),
            lines_read: HashMap::new(),
            pending: Vec::new(),
            reading: 0,
            warmed_up: false,
            msg_tx,
            msg_rx,
            events: events_tx,
            discoveries,
            stop: stop_rx,
            config,
        };
        let join = tokio::spawn(async move {
            actor.run().await;
            poller.shutdown().await;
        });
        (
            TailHandle {
                shutdown: stop_tx,
                join,
            },
            events_rx,
        )
    }
}

enum MergeMsg {
    /// A file is due for a read cycle
    CycleDue(LogFileKey),
    /// A read cycle finished
    CycleDone {
        key: LogFileKey,
        outcome: CycleOutcome,
    },
    /// The warm-up period ended
    WarmupOver,
}

struct CycleOutcome {
    /// Records parsed from lines past the previous offset
    records: Vec<Record>,
    /// Total countable lines in the content just read
    lines_seen: u64,
    /// The read failure or per-line parse failures, relayed as events
    errors: Vec<TailError>,
}

struct MergeActor<S: ?Sized, C> {
    store: Arc<S>,
    clock: C,
    config: TailConfig,
    /// Records with timestamps at or before this are dropped on read
    floor_ms: i64,
    /// host → newest discovered key
    active: HashMap<String, LogFileKey>,
    /// keys still on the repeating read schedule
    polled: HashSet<String>,
    /// keys with a cycle currently running
    in_flight: HashSet<String>,
    /// keys whose next cycle was requested while one was running
    due_again: HashSet<String>,
    /// key → lines already consumed (monotone)
    lines_read: HashMap<String, u64>,
    pending: Vec<Record>,
    /// read cycles currently in flight, gating warm-up emission
    reading: usize,
    warmed_up: bool,
    msg_tx: mpsc::UnboundedSender<MergeMsg>,
    msg_rx: mpsc::UnboundedReceiver<MergeMsg>,
    events: mpsc::UnboundedSender<TailEvent>,
    discoveries: mpsc::UnboundedReceiver<DiscoveryEvent>,
    stop: oneshot::Receiver<()>,
}

impl<S, C> MergeActor<S, C>
where
    S: ObjectStore + ?Sized,
    C: TailClock,
{
    async fn run(mut self) {
        {
            let tx = self.msg_tx.clone();
            let warmup = self.config.warmup;
            tokio::spawn(async move {
                tokio::time::sleep(warmup).await;
                let _ = tx.send(MergeMsg::WarmupOver);
            });
        }

        loop {
            tokio::select! {
                _ = &mut self.stop => break,
                Some(event) = self.discoveries.recv() => self.on_discovery(event),
                Some(msg) = self.msg_rx.recv() => self.on_message(msg),
                else => break,
            }
        }
    }

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Error(e) => {
                let _ = self.events.send(TailEvent::Error(e));
            }
            DiscoveryEvent::File(key) => {
                let _ = self.events.send(TailEvent::File(key.clone()));
                let host = key.host().to_string();
                if self.active.get(&host) == Some(&key) {
                    return;
                }
                if let Some(old) = self.active.insert(host, key.clone()) {
                    // superseded: one final drain, then no rescheduling
                    self.polled.remove(old.as_str());
                    let _ = self.msg_tx.send(MergeMsg::CycleDue(old));
                }
                self.polled.insert(key.as_str().to_string());
                self.lines_read.entry(key.as_str().to_string()).or_insert(0);
                let _ = self.msg_tx.send(MergeMsg::CycleDue(key));
            }
        }
    }

    fn on_message(&mut self, msg: MergeMsg) {
        match msg {
            MergeMsg::CycleDue(key) => self.start_cycle(key),
            MergeMsg::CycleDone { key, outcome } => self.finish_cycle(key, outcome),
            MergeMsg::WarmupOver => {
                self.warmed_up = true;
                self.flush();
            }
        }
    }

    /// Begin a read cycle for `key`, unless one is already running (in
    /// which case the request is remembered and honored on completion).
    fn start_cycle(&mut self, key: LogFileKey) {
        // a timer armed before supersession can still fire after the file
        // retired and its offset was pruned; reading it again from zero
        // would re-emit its lines
        if !self.polled.contains(key.as_str()) && !self.lines_read.contains_key(key.as_str()) {
            return;
        }
        if self.in_flight.contains(key.as_str()) {
            self.due_again.insert(key.as_str().to_string());
            return;
        }
        self.in_flight.insert(key.as_str().to_string());
        self.reading += 1;

        let offset = self.lines_read.get(key.as_str()).copied().unwrap_or(0);
        let store = self.store.clone();
        let floor_ms = self.floor_ms;
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let outcome = read_cycle(store.as_ref(), &key, offset, floor_ms).await;
            let _ = tx.send(MergeMsg::CycleDone { key, outcome });
        });
    }

    fn finish_cycle(&mut self, key: LogFileKey, outcome: CycleOutcome) {
        self.in_flight.remove(key.as_str());
        self.reading -= 1;

        for err in outcome.errors {
            let _ = self.events.send(TailEvent::Error(err));
        }
        let offset = self.lines_read.entry(key.as_str().to_string()).or_insert(0);
        *offset = (*offset).max(outcome.lines_seen);
        self.pending.extend(outcome.records);

        let requested = self.due_again.remove(key.as_str());
        if self.polled.contains(key.as_str()) {
            self.schedule_cycle(key);
        } else if requested {
            // drain request that arrived mid-cycle
            let _ = self.msg_tx.send(MergeMsg::CycleDue(key));
        } else {
            debug!(key = %key, "file retired");
            self.lines_read.remove(key.as_str());
        }
        self.flush();
    }

    fn schedule_cycle(&self, key: LogFileKey) {
        let tx = self.msg_tx.clone();
        let delay = self.config.poll_interval;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(MergeMsg::CycleDue(key));
        });
    }

    /// Emit every pending record that has aged out of the delay window.
    ///
    /// The buffer is sorted so untimestamped records come first (they
    /// bypass the gate entirely), then by timestamp; scanning stops at the
    /// first record still inside the window, since later entries are even
    /// more recent.
    fn flush(&mut self) {
        if self.reading > 0 && !self.warmed_up {
            return;
        }
        self.pending
            .sort_by_key(|r| (r.timestamp_ms.is_some(), r.timestamp_ms));

        let now = self.clock.now_ms();
        let window_ms = self.config.delay_window.as_millis() as i64;
        let mut ready = 0;
        for record in &self.pending {
            match record.timestamp_ms {
                None => {}
                Some(ts) if now - ts > 2 * window_ms => {}
                Some(_) => break,
            }
            ready += 1;
        }
        for record in self.pending.drain(..ready) {
            let _ = self.events.send(TailEvent::Record(record));
        }
    }
}

/// Re-read a file's whole content, skipping the first `offset` lines.
///
/// Malformed JSON lines are surfaced as `Parse` errors and skipped (still
/// counted, so each is reported once); records whose timestamp does not
/// clear the floor are dropped.
async fn read_cycle<S>(
    store: &S,
    key: &LogFileKey,
    offset: u64,
    floor_ms: i64,
) -> CycleOutcome
where
    S: ObjectStore + ?Sized,
{
    let data = match store.get(key.as_str()).await {
        Ok(data) => data,
        Err(source) => {
            return CycleOutcome {
                records: Vec::new(),
                lines_seen: offset,
                errors: vec![TailError::Read {
                    key: key.as_str().to_string(),
                    source,
                }],
            }
        }
    };

    let mut records = Vec::new();
    let mut errors = Vec::new();
    let mut seen = 0u64;
    for line in split_lines(&data) {
        seen += 1;
        if seen <= offset {
            continue;
        }
        let value: Value = match serde_json::from_slice(line) {
            Ok(value) => value,
            Err(source) => {
                warn!(key = %key, line = seen, error = %source, "skipping malformed JSON line");
                errors.push(TailError::Parse {
                    key: key.as_str().to_string(),
                    line: seen,
                    source,
                });
                continue;
            }
        };
        match timestamp_field(&value) {
            TimestampField::Absent => records.push(Record {
                timestamp_ms: None,
                value,
            }),
            TimestampField::At(ts) => {
                if ts > floor_ms {
                    records.push(Record {
                        timestamp_ms: Some(ts),
                        value,
                    });
                }
            }
            TimestampField::Unparseable => {
                warn!(key = %key, line = seen, "dropping record with unreadable timestamp");
            }
        }
    }
    CycleOutcome {
        records,
        lines_seen: seen,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryObjectStore;

    fn key(s: &str) -> LogFileKey {
        LogFileKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_read_cycle_skips_counted_lines() {
        let store = InMemoryObjectStore::new();
        let k = "2023-01-01-00-00-hostA-prod.log";
        store.append_line(k, r#"{"n":1}"#);
        store.append_line(k, r#"{"n":2}"#);
        store.append_line(k, r#"{"n":3}"#);

        let outcome = read_cycle(&store, &key(k), 2, 0).await;
        assert_eq!(outcome.lines_seen, 3);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].value["n"], 3);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_read_cycle_reports_malformed_line_once() {
        let store = InMemoryObjectStore::new();
        let k = "2023-01-01-00-00-hostA-prod.log";
        store.append_line(k, r#"{"n":1}"#);
        store.append_line(k, "not json at all");
        store.append_line(k, r#"{"n":2}"#);

        let outcome = read_cycle(&store, &key(k), 0, 0).await;
        assert_eq!(outcome.lines_seen, 3);
        assert_eq!(outcome.records.len(), 2);
        match outcome.errors.as_slice() {
            [TailError::Parse { line, .. }] => assert_eq!(*line, 2),
            other => panic!("expected one parse error, got {:?}", other),
        }

        // a re-read from the new offset yields nothing new, and the
        // malformed line is not reported again
        let outcome = read_cycle(&store, &key(k), outcome.lines_seen, 0).await;
        assert_eq!(outcome.lines_seen, 3);
        assert!(outcome.records.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_read_cycle_applies_time_floor() {
        let store = InMemoryObjectStore::new();
        let k = "2023-01-01-00-00-hostA-prod.log";
        store.append_line(k, r#"{"timestamp":"2022-12-31T23:00:00Z","n":1}"#);
        store.append_line(k, r#"{"timestamp":"2023-01-01T00:00:01Z","n":2}"#);
        store.append_line(k, r#"{"n":3}"#);

        let floor = chrono::Utc
            .with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
            .unwrap()
            .timestamp_millis();
        let outcome = read_cycle(&store, &key(k), 0, floor).await;
        // the pre-start record is dropped but still counted
        assert_eq!(outcome.lines_seen, 3);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].value["n"], 2);
        assert_eq!(outcome.records[1].value["n"], 3);
    }

    #[tokio::test]
    async fn test_read_cycle_reports_read_error() {
        let store = InMemoryObjectStore::new();
        let outcome = read_cycle(&store, &key("2023-01-01-00-00-hostA-prod.log"), 5, 0).await;
        assert!(matches!(outcome.errors.as_slice(), [TailError::Read { .. }]));
        // offset is preserved so nothing is re-emitted after recovery
        assert_eq!(outcome.lines_seen, 5);
        assert!(outcome.records.is_empty());
    }

    use chrono::TimeZone;

    /// Drive flush() directly against a hand-built actor.
    fn test_actor(
        clock: ManualClock,
    ) -> (
        MergeActor<InMemoryObjectStore, ManualClock>,
        mpsc::UnboundedReceiver<TailEvent>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = oneshot::channel();
        let (_discovery_tx, discovery_rx) = mpsc::unbounded_channel::<DiscoveryEvent>();
        let actor = MergeActor {
            store: Arc::new(InMemoryObjectStore::new()),
            clock,
            config: TailConfig::test("prod"),
            floor_ms: 0,
            active: HashMap::new(),
            polled: HashSet::new(),
            in_flight: HashSet::new(),
            due_again: HashSet::new(),
            lines_read: HashMap::new(),
            pending: Vec::new(),
            reading: 0,
            warmed_up: true,
            msg_tx,
            msg_rx,
            events: events_tx,
            discoveries: discovery_rx,
            stop: stop_rx,
        };
        (actor, events_rx)
    }

    fn timed(ts: i64, n: i64) -> Record {
        Record {
            timestamp_ms: Some(ts),
            value: serde_json::json!({ "n": n }),
        }
    }

    #[tokio::test]
    async fn test_retired_file_bookkeeping_is_pruned() {
        let (mut actor, _rx) = test_actor(ManualClock::new(0));
        let k = key("2023-01-01-00-00-hostA-prod.log");
        // registered, then superseded: no longer on the poll schedule
        actor.lines_read.insert(k.as_str().to_string(), 7);
        actor.in_flight.insert(k.as_str().to_string());
        actor.reading = 1;

        actor.finish_cycle(
            k.clone(),
            CycleOutcome {
                records: Vec::new(),
                lines_seen: 7,
                errors: Vec::new(),
            },
        );
        assert!(!actor.lines_read.contains_key(k.as_str()));
        assert!(actor.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_stale_cycle_request_after_retirement_is_ignored() {
        let (mut actor, _rx) = test_actor(ManualClock::new(0));
        let k = key("2023-01-01-00-00-hostA-prod.log");
        // not scheduled, no offset bookkeeping: fully retired
        actor.start_cycle(k);
        assert_eq!(actor.reading, 0);
        assert!(actor.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_offset_survives_pending_drain_request() {
        let (mut actor, _rx) = test_actor(ManualClock::new(0));
        let k = key("2023-01-01-00-00-hostA-prod.log");
        actor.lines_read.insert(k.as_str().to_string(), 3);
        actor.in_flight.insert(k.as_str().to_string());
        actor.due_again.insert(k.as_str().to_string());
        actor.reading = 1;

        // one more drain cycle is owed, so the offset must stay
        actor.finish_cycle(
            k.clone(),
            CycleOutcome {
                records: Vec::new(),
                lines_seen: 3,
                errors: Vec::new(),
            },
        );
        assert_eq!(actor.lines_read.get(k.as_str()), Some(&3));
    }

    #[tokio::test]
    async fn test_flush_emits_only_past_double_window() {
        let clock = ManualClock::new(100_000);
        let (mut actor, mut rx) = test_actor(clock.clone());
        let window = actor.config.delay_window.as_millis() as i64;

        actor.pending.push(timed(100_000 - 2 * window - 1, 1)); // aged out
        actor.pending.push(timed(100_000 - window, 2)); // still inside

        actor.flush();
        match rx.try_recv().unwrap() {
            TailEvent::Record(r) => assert_eq!(r.value["n"], 1),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(actor.pending.len(), 1);

        // once enough time passes the second record drains too
        clock.advance(std::time::Duration::from_millis((window + 2) as u64));
        actor.flush();
        match rx.try_recv().unwrap() {
            TailEvent::Record(r) => assert_eq!(r.value["n"], 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_flush_reorders_across_arrival_order() {
        let clock = ManualClock::new(1_000_000);
        let (mut actor, mut rx) = test_actor(clock);
        // arrived late but timestamped earlier
        actor.pending.push(timed(10_000, 2));
        actor.pending.push(timed(9_950, 1));

        actor.flush();
        let mut order = Vec::new();
        while let Ok(TailEvent::Record(r)) = rx.try_recv() {
            order.push(r.value["n"].as_i64().unwrap());
        }
        assert_eq!(order, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_flush_unstamped_records_bypass_gate() {
        let clock = ManualClock::new(100_000);
        let (mut actor, mut rx) = test_actor(clock);
        let window = actor.config.delay_window.as_millis() as i64;

        // a fresh timestamped record that must be held back
        actor.pending.push(timed(100_000 - window, 7));
        actor.pending.push(Record {
            timestamp_ms: None,
            value: serde_json::json!({"msg": "untimed"}),
        });

        actor.flush();
        match rx.try_recv().unwrap() {
            TailEvent::Record(r) => assert_eq!(r.value["msg"], "untimed"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "held record escaped the window");
        assert_eq!(actor.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_suppressed_while_reading_before_warmup() {
        let clock = ManualClock::new(100_000);
        let (mut actor, mut rx) = test_actor(clock);
        actor.warmed_up = false;
        actor.reading = 1;
        actor.pending.push(timed(1_000, 1)); // ancient, would emit

        actor.flush();
        assert!(rx.try_recv().is_err());

        // zero files mid-read lifts the suppression early
        actor.reading = 0;
        actor.flush();
        assert!(matches!(rx.try_recv().unwrap(), TailEvent::Record(_)));
    }
}
