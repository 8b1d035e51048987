//! Refresh coordinator: the single owner of the cached position sample.
//!
//! The freshness check, the in-flight transition and the cache replacement
//! all happen under one `parking_lot::Mutex` that is never held across an
//! `.await`. The upstream call itself runs on a spawned task, so a caller
//! that gets cancelled mid-refresh never strands the in-flight state, and
//! every caller (the one that started the refresh included) waits on the
//! same `watch` channel for its outcome.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{FetchError, PositionSample};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use iss_client::PositionSource;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type UpstreamQuota = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Outcome shared between all callers waiting on one refresh.
type Lookup = Result<CachedPosition, Unavailable>;

/// No sample has ever been obtained from upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no position sample has been obtained yet")]
pub struct Unavailable;

/// A snapshot handed to a caller, with staleness disclosure.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPosition {
    pub sample: PositionSample,
    /// True when a refresh was needed but failed, so this is the last good sample.
    pub stale: bool,
}

/// Counters exposed for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub upstream_calls: u64,
    pub upstream_failures: u64,
    pub cache_hits: u64,
    pub coalesced_waits: u64,
    pub throttled: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    sample: PositionSample,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, max_age: Duration) -> bool {
        if max_age.is_zero() {
            return false;
        }
        // A stored instant ahead of `now` counts as fresh.
        match now.checked_duration_since(self.stored_at) {
            Some(age) => age < max_age,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    entry: Option<CacheEntry>,
    in_flight: Option<watch::Receiver<Option<Lookup>>>,
}

impl State {
    /// Install `candidate` unless the cache already holds something newer.
    /// Returns the sample the cache holds afterwards.
    fn store(&mut self, mut candidate: CacheEntry) -> PositionSample {
        if let Some(current) = &self.entry {
            if current.stored_at > candidate.stored_at {
                debug!("Discarding out-of-order sample (ts={})", candidate.sample.timestamp);
                return current.sample.clone();
            }
            if candidate.sample.fetched_at < current.sample.fetched_at {
                candidate.sample.fetched_at = current.sample.fetched_at;
            }
        }
        let sample = candidate.sample.clone();
        self.entry = Some(candidate);
        sample
    }

    fn last_good(&self) -> Lookup {
        self.entry
            .as_ref()
            .map(|entry| CachedPosition {
                sample: entry.sample.clone(),
                stale: true,
            })
            .ok_or(Unavailable)
    }
}

#[derive(Debug, Default)]
struct Counters {
    upstream_calls: AtomicU64,
    upstream_failures: AtomicU64,
    cache_hits: AtomicU64,
    coalesced_waits: AtomicU64,
    throttled: AtomicU64,
}

enum Attempt {
    Fetched(PositionSample),
    Failed(FetchError),
    Throttled,
}

struct Inner {
    source: Arc<dyn PositionSource>,
    quota: Option<UpstreamQuota>,
    state: Mutex<State>,
    counters: Counters,
}

/// Cheap-to-clone handle to the shared cache.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Coordinator with no upstream quota beyond coalescing and `max_age`.
    pub fn new(source: Arc<dyn PositionSource>) -> Self {
        Self::with_quota(source, 0)
    }

    /// Coordinator allowing at most `max_requests_per_sec` upstream calls (0 = unlimited).
    pub fn with_quota(source: Arc<dyn PositionSource>, max_requests_per_sec: u32) -> Self {
        let quota = NonZeroU32::new(max_requests_per_sec)
            .map(|per_sec| RateLimiter::direct(Quota::per_second(per_sec)));

        Self {
            inner: Arc::new(Inner {
                source,
                quota,
                state: Mutex::new(State::default()),
                counters: Counters::default(),
            }),
        }
    }

    /// Return the cached sample if younger than `max_age`, otherwise refresh
    /// through upstream (joining a refresh already in flight).
    pub async fn get(&self, max_age: Duration) -> Result<CachedPosition, Unavailable> {
        let (mut outcome_rx, refresh_tx) = {
            let mut state = self.inner.state.lock();

            if let Some(entry) = &state.entry {
                if entry.is_fresh(Instant::now(), max_age) {
                    self.inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(CachedPosition {
                        sample: entry.sample.clone(),
                        stale: false,
                    });
                }
            }

            match &state.in_flight {
                Some(rx) => {
                    self.inner
                        .counters
                        .coalesced_waits
                        .fetch_add(1, Ordering::Relaxed);
                    (rx.clone(), None)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight = Some(rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        if let Some(tx) = refresh_tx {
            self.spawn_refresh(tx);
        }

        let published = match outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        // `None` here means the refresh task died without publishing.
        published.unwrap_or_else(|| self.inner.state.lock().last_good())
    }

    /// Last stored sample, without triggering a refresh.
    pub fn peek(&self) -> Option<PositionSample> {
        self.inner
            .state
            .lock()
            .entry
            .as_ref()
            .map(|entry| entry.sample.clone())
    }

    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.inner.counters;
        CoordinatorStats {
            upstream_calls: c.upstream_calls.load(Ordering::Relaxed),
            upstream_failures: c.upstream_failures.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            coalesced_waits: c.coalesced_waits.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
        }
    }

    fn spawn_refresh(&self, tx: watch::Sender<Option<Lookup>>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut reset = InFlightReset {
                state: &inner.state,
                armed: true,
            };
            let attempt = inner.attempt().await;
            let outcome = inner.complete(attempt);
            reset.armed = false;
            // Waiters may all have gone away; that's fine.
            let _ = tx.send(Some(outcome));
        });
    }
}

impl Inner {
    async fn attempt(&self) -> Attempt {
        if let Some(quota) = &self.quota {
            if quota.check().is_err() {
                self.counters.throttled.fetch_add(1, Ordering::Relaxed);
                return Attempt::Throttled;
            }
        }

        self.counters.upstream_calls.fetch_add(1, Ordering::Relaxed);
        match self.source.fetch().await {
            Ok(sample) => Attempt::Fetched(sample),
            Err(e) => {
                self.counters.upstream_failures.fetch_add(1, Ordering::Relaxed);
                Attempt::Failed(e)
            }
        }
    }

    /// Apply a finished attempt and clear the in-flight flag in one step.
    fn complete(&self, attempt: Attempt) -> Lookup {
        let mut state = self.state.lock();
        state.in_flight = None;

        match attempt {
            Attempt::Fetched(sample) => {
                let first = state.entry.is_none();
                let stored = state.store(CacheEntry {
                    sample,
                    stored_at: Instant::now(),
                });
                if first {
                    info!(
                        "First position sample cached: lat={:.4} lon={:.4}",
                        stored.latitude, stored.longitude
                    );
                } else {
                    debug!("Position refreshed (ts={})", stored.timestamp);
                }
                Ok(CachedPosition {
                    sample: stored,
                    stale: false,
                })
            }
            Attempt::Failed(e) => {
                let fallback = state.last_good();
                warn!(
                    "Upstream refresh failed ({}); serving {}",
                    e,
                    if fallback.is_ok() { "stale sample" } else { "nothing" }
                );
                fallback
            }
            Attempt::Throttled => {
                debug!("Upstream quota exhausted; skipping refresh");
                state.last_good()
            }
        }
    }
}

/// Clears the in-flight flag if the refresh task unwinds before completing.
struct InFlightReset<'a> {
    state: &'a Mutex<State>,
    armed: bool,
}

impl Drop for InFlightReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().in_flight = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_at, ScriptedSource};

    fn coordinator(source: &Arc<ScriptedSource>) -> RefreshCoordinator {
        RefreshCoordinator::new(Arc::clone(source) as Arc<dyn PositionSource>)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_is_unavailable() {
        let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::http("502"))]));
        let coord = coordinator(&source);

        assert_eq!(coord.get(Duration::from_secs(1)).await, Err(Unavailable));
        assert_eq!(source.calls(), 1);
        assert!(coord.peek().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_serves_cache_until_max_age() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(sample_at(1.0, 1.0, 100)),
            Ok(sample_at(2.0, 2.0, 101)),
        ]));
        let coord = coordinator(&source);
        let max_age = Duration::from_secs(1);

        let first = coord.get(max_age).await.unwrap();
        assert_eq!(first.sample.timestamp, 100);
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_millis(999)).await;
        let hit = coord.get(max_age).await.unwrap();
        assert_eq!(hit.sample.timestamp, 100);
        assert!(!hit.stale);
        assert_eq!(source.calls(), 1);

        // Age equal to max_age is no longer fresh.
        tokio::time::advance(Duration::from_millis(1)).await;
        let refreshed = coord.get(max_age).await.unwrap();
        assert_eq!(refreshed.sample.timestamp, 101);
        assert_eq!(source.calls(), 2);
        assert_eq!(coord.stats().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_upstream_call() {
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(sample_at(10.5, -20.25, 1_700_000_000))])
                .with_delay(Duration::from_millis(50)),
        );
        let coord = coordinator(&source);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let coord = coord.clone();
                tokio::spawn(async move { coord.get(Duration::from_secs(1)).await })
            })
            .collect();

        for handle in handles {
            let got = handle.await.unwrap().expect("every caller gets the sample");
            assert_eq!(got.sample.latitude, 10.5);
            assert!(!got.stale);
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(coord.stats().upstream_calls, 1);
        assert_eq!(coord.stats().coalesced_waits, 31);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_callers_share_one_upstream_call() {
        const CALLERS: usize = 64;

        for round in 0..20 {
            let source = Arc::new(
                ScriptedSource::new(vec![Ok(sample_at(1.0, 1.0, round))])
                    .with_delay(Duration::from_millis(20)),
            );
            let coord = coordinator(&source);
            let barrier = Arc::new(tokio::sync::Barrier::new(CALLERS));

            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    let coord = coord.clone();
                    let barrier = Arc::clone(&barrier);
                    tokio::spawn(async move {
                        barrier.wait().await;
                        coord.get(Duration::from_secs(60)).await
                    })
                })
                .collect();

            for handle in handles {
                let got = handle.await.unwrap().expect("every caller gets the sample");
                assert_eq!(got.sample.timestamp, round);
            }
            assert_eq!(source.calls(), 1, "round {round}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_prior_sample_as_stale() {
        let source = Arc::new(
            ScriptedSource::new(vec![
                Ok(sample_at(1.0, 1.0, 100)),
                Err(FetchError::network("timed out")),
            ])
            .with_delay(Duration::from_millis(10)),
        );
        let coord = coordinator(&source);
        coord.get(Duration::from_secs(1)).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coord = coord.clone();
                tokio::spawn(async move { coord.get(Duration::ZERO).await })
            })
            .collect();

        for handle in handles {
            let got = handle.await.unwrap().expect("stale data, not an error");
            assert!(got.stale);
            assert_eq!(got.sample.timestamp, 100);
        }
        assert_eq!(source.calls(), 2);
        assert_eq!(coord.stats().upstream_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_retried_by_next_caller() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(FetchError::parse("missing field")),
            Ok(sample_at(3.0, 3.0, 300)),
        ]));
        let coord = coordinator(&source);

        assert_eq!(coord.get(Duration::from_secs(1)).await, Err(Unavailable));
        let got = coord.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.sample.timestamp, 300);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_age_forces_refresh() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(sample_at(1.0, 1.0, 100)),
            Ok(sample_at(2.0, 2.0, 101)),
        ]));
        let coord = coordinator(&source);

        coord.get(Duration::from_secs(60)).await.unwrap();
        let got = coord.get(Duration::ZERO).await.unwrap();
        assert_eq!(got.sample.timestamp, 101);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_stored_at_counts_as_fresh() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let coord = coordinator(&source);
        coord.inner.state.lock().store(CacheEntry {
            sample: sample_at(5.0, 5.0, 500),
            stored_at: Instant::now() + Duration::from_secs(30),
        });

        let got = coord.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.sample.timestamp, 500);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_never_regresses() {
        let mut state = State::default();
        let now = Instant::now();

        let newer = sample_at(2.0, 2.0, 200);
        state.store(CacheEntry {
            sample: newer.clone(),
            stored_at: now + Duration::from_secs(2),
        });
        let kept = state.store(CacheEntry {
            sample: sample_at(1.0, 1.0, 100),
            stored_at: now + Duration::from_secs(1),
        });
        assert_eq!(kept, newer);

        // Wall clock stepping backwards is clamped.
        let mut rewound = sample_at(3.0, 3.0, 300);
        rewound.fetched_at = newer.fetched_at - chrono::Duration::seconds(10);
        let stored = state.store(CacheEntry {
            sample: rewound,
            stored_at: now + Duration::from_secs(3),
        });
        assert_eq!(stored.timestamp, 300);
        assert_eq!(stored.fetched_at, newer.fetched_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_strand_refresh() {
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(sample_at(1.0, 1.0, 100))])
                .with_delay(Duration::from_millis(100)),
        );
        let coord = coordinator(&source);

        let caller = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.get(Duration::from_secs(1)).await })
        };
        tokio::task::yield_now().await;
        caller.abort();

        let got = coord.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.sample.timestamp, 100);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_refresh_clears_in_flight() {
        let source = Arc::new(
            ScriptedSource::new(vec![Ok(sample_at(1.0, 1.0, 100))]).panicking_on(1),
        );
        let coord = coordinator(&source);

        assert_eq!(coord.get(Duration::from_secs(1)).await, Err(Unavailable));
        let got = coord.get(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.sample.timestamp, 100);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_quota_throttles_upstream() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(sample_at(1.0, 1.0, 100)),
            Ok(sample_at(2.0, 2.0, 101)),
        ]));
        let coord =
            RefreshCoordinator::with_quota(Arc::clone(&source) as Arc<dyn PositionSource>, 1);

        coord.get(Duration::ZERO).await.unwrap();
        let got = coord.get(Duration::ZERO).await.unwrap();
        assert!(got.stale);
        assert_eq!(got.sample.timestamp, 100);
        assert_eq!(source.calls(), 1);
        assert_eq!(coord.stats().throttled, 1);
    }
}
