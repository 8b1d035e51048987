//! Consumer poller: fixed-interval loop that keeps a trace of positions.
//!
//! At most one poll is outstanding at a time. A tick that fires while the
//! previous poll is still running is counted and dropped, never queued, so a
//! slow tracker cannot build up a backlog. Failed polls leave the displayed
//! position and the trace untouched.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use common::PositionReport;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::feed::{PollError, PositionFeed};
use crate::trace::Trace;

type PollFuture<'a> = Pin<Box<dyn Future<Output = Result<PositionReport, PollError>> + Send + 'a>>;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// No poll has completed yet.
    Waiting,
    Live,
    /// Update failed, retrying on the next tick.
    Retrying {
        consecutive_failures: u32,
        last_error: String,
    },
}

/// What a consumer currently shows.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerState {
    pub displayed: Option<PositionReport>,
    pub trace: Trace,
    pub status: PollStatus,
    pub ticks: u64,
    pub skipped_ticks: u64,
}

impl Default for PollerState {
    fn default() -> Self {
        Self {
            displayed: None,
            trace: Trace::new(),
            status: PollStatus::Waiting,
            ticks: 0,
            skipped_ticks: 0,
        }
    }
}

impl PollerState {
    /// Fold one poll outcome into the state.
    pub fn apply(&mut self, outcome: Result<PositionReport, PollError>) {
        match outcome {
            Ok(report) => {
                if let PollStatus::Retrying {
                    consecutive_failures,
                    ..
                } = &self.status
                {
                    info!(
                        "Position updates recovered after {} failed polls",
                        consecutive_failures
                    );
                }
                self.trace.push(&report);
                self.displayed = Some(report);
                self.status = PollStatus::Live;
            }
            Err(e) => {
                let consecutive_failures = match &self.status {
                    PollStatus::Retrying {
                        consecutive_failures,
                        ..
                    } => consecutive_failures.saturating_add(1),
                    _ => 1,
                };
                warn!(
                    "Position update failed, retrying ({} in a row): {}",
                    consecutive_failures, e
                );
                self.status = PollStatus::Retrying {
                    consecutive_failures,
                    last_error: e.to_string(),
                };
            }
        }
    }

    pub fn is_retrying(&self) -> bool {
        matches!(self.status, PollStatus::Retrying { .. })
    }
}

/// Periodic poller over a `PositionFeed`.
pub struct Poller {
    feed: Arc<dyn PositionFeed>,
    interval: Duration,
}

impl Poller {
    pub fn new(feed: Arc<dyn PositionFeed>, interval: Duration) -> Self {
        Self {
            feed,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Start polling on a background task.
    pub fn spawn(self) -> PollerHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(PollerState::default());
        let task = tokio::spawn(self.run(tx, cancel.clone()));

        PollerHandle {
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            state: rx,
            task,
        }
    }

    async fn run(self, tx: watch::Sender<PollerState>, cancel: CancellationToken) {
        info!("Poller started (interval={:?})", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pending: Option<PollFuture<'_>> = None;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                outcome = poll_slot(&mut pending), if pending.is_some() => {
                    pending = None;
                    tx.send_modify(|state| state.apply(outcome));
                }

                _ = ticker.tick() => {
                    if pending.is_some() {
                        debug!("Previous poll still outstanding; skipping tick");
                        tx.send_modify(|state| {
                            state.ticks += 1;
                            state.skipped_ticks += 1;
                        });
                    } else {
                        tx.send_modify(|state| state.ticks += 1);
                        pending = Some(self.feed.latest());
                    }
                }
            }
        }

        info!("Poller stopped");
    }
}

async fn poll_slot(slot: &mut Option<PollFuture<'_>>) -> Result<PositionReport, PollError> {
    match slot.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// Handle to a running poller. Dropping it cancels the task.
pub struct PollerHandle {
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
    state: watch::Receiver<PollerState>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> PollerState {
        self.state.borrow().clone()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Poller task ended abnormally: {}", e);
        }
    }
}
