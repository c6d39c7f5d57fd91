//! File Discovery Poller
//!
//! Repeatedly searches the key space to discover new or rotated log files,
//! tracking the newest key per host and emitting one event per discovery.
//!
//! ```text
//! cold start:  search(since, far-future)      → emit every key (backlog)
//! every tick:  search(oldest tracked, far-future) → emit strictly newer keys
//! ```
//!
//! The re-poll window starts at the *oldest* tracked host key: a host that
//! has been quiet must not have its older-but-unseen files skipped just
//! because a faster host has advanced past them.
//!
//! A search error is emitted as an event and then handled per the
//! configured `DiscoveryErrorPolicy`; the poller never retries on its own
//! tick schedule.

use crate::clock::TailClock;
use crate::config::{DiscoveryErrorPolicy, TailConfig};
use crate::error::TailError;
use crate::key::{format_minute, LogFileKey, FAR_FUTURE};
use crate::search::search;
use crate::store::ObjectStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Event stream produced by the poller
#[derive(Debug)]
pub enum DiscoveryEvent {
    /// A file not seen before (or newer than the host's tracked file)
    File(LogFileKey),
    /// A discovery search failed
    Error(TailError),
}

/// Handle to a running poller
pub struct PollerHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the poll loop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.join.await;
    }
}

/// Poller actor over one mutable map of host → newest key seen
pub struct FilePoller<S: ?Sized, C> {
    store: Arc<S>,
    clock: C,
    config: TailConfig,
    since: DateTime<Utc>,
    hosts: HashMap<String, LogFileKey>,
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
    stop: oneshot::Receiver<()>,
}

impl<S, C> FilePoller<S, C>
where
    S: ObjectStore + ?Sized,
    C: TailClock,
{
    /// Spawn the poller. The first search replays the whole backlog from
    /// `since`; every key it returns is emitted once.
    pub fn spawn(
        store: Arc<S>,
        clock: C,
        config: TailConfig,
        since: DateTime<Utc>,
    ) -> (PollerHandle, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let poller = FilePoller {
            store,
            clock,
            config,
            since,
            hosts: HashMap::new(),
            tx,
            stop: stop_rx,
        };
        let join = tokio::spawn(poller.run());
        (
            PollerHandle {
                shutdown: stop_tx,
                join,
            },
            rx,
        )
    }

    async fn run(mut self) {
        let since = format_minute(self.since);
        if !self.poll_once(&since, true).await {
            return;
        }
        loop {
            tokio::select! {
                _ = &mut self.stop => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
            let since = self.oldest_tracked_minute().unwrap_or_else(|| {
                format_minute(
                    self.clock.now_utc()
                        - chrono::Duration::milliseconds(self.config.lookback.as_millis() as i64),
                )
            });
            if !self.poll_once(&since, false).await {
                break;
            }
        }
    }

    /// Minute prefix of the oldest currently tracked host key
    fn oldest_tracked_minute(&self) -> Option<String> {
        self.hosts
            .values()
            .map(|k| k.minute())
            .min()
            .map(str::to_string)
    }

    /// One search pass. Returns false when polling should stop.
    async fn poll_once(&mut self, since: &str, replay_all: bool) -> bool {
        debug!(since, replay_all, "polling for files");
        let found = match search(
            self.store.as_ref(),
            since,
            FAR_FUTURE,
            &self.config.stage,
            self.config.list_concurrency,
        )
        .await
        {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "discovery search failed");
                let _ = self.tx.send(DiscoveryEvent::Error(e));
                return match self.config.on_discovery_error {
                    DiscoveryErrorPolicy::Halt => false,
                    DiscoveryErrorPolicy::Retry { backoff } => {
                        tokio::time::sleep(backoff).await;
                        true
                    }
                };
            }
        };

        for key in found {
            let host = key.host().to_string();
            let newer = self
                .hosts
                .get(&host)
                .map_or(true, |cur| cur.minute() < key.minute());
            if replay_all {
                // initial backlog replay: every key goes out once
                if self.tx.send(DiscoveryEvent::File(key.clone())).is_err() {
                    return false;
                }
                if newer {
                    self.hosts.insert(host, key);
                }
            } else if newer {
                info!(key = %key, host, "discovered new file");
                if self.tx.send(DiscoveryEvent::File(key.clone())).is_err() {
                    return false;
                }
                self.hosts.insert(host, key);
            }
        }
        true
    }
}
