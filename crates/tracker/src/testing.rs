//! Scripted fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{FetchError, PositionReport, PositionSample};
use iss_client::PositionSource;
use parking_lot::Mutex;

use crate::feed::{PollError, PositionFeed};

pub(crate) fn sample_at(latitude: f64, longitude: f64, timestamp: i64) -> PositionSample {
    PositionSample {
        latitude,
        longitude,
        altitude: 420.0,
        velocity: 27_500.0,
        timestamp,
        fetched_at: Utc::now(),
    }
}

pub(crate) fn report_at(latitude: f64, longitude: f64, time: i64) -> PositionReport {
    PositionReport::from_sample(&sample_at(latitude, longitude, time), false)
}

/// Upstream fake that replays a fixed list of outcomes and counts calls.
pub(crate) struct ScriptedSource {
    calls: AtomicUsize,
    delay: Duration,
    panic_on_call: Option<usize>,
    outcomes: Mutex<VecDeque<Result<PositionSample, FetchError>>>,
}

impl ScriptedSource {
    pub(crate) fn new(outcomes: Vec<Result<PositionSample, FetchError>>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            panic_on_call: None,
            outcomes: Mutex::new(outcomes.into()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Panic instead of answering on the given 1-based call.
    pub(crate) fn panicking_on(mut self, call: usize) -> Self {
        self.panic_on_call = Some(call);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionSource for ScriptedSource {
    async fn fetch(&self) -> Result<PositionSample, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_on_call == Some(call) {
            panic!("scripted upstream panic on call {call}");
        }
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::network("script exhausted")))
    }
}

/// Consumer-side fake that replays poll outcomes.
pub(crate) struct ScriptedFeed {
    calls: AtomicUsize,
    delay: Duration,
    outcomes: Mutex<VecDeque<Result<PositionReport, PollError>>>,
}

impl ScriptedFeed {
    pub(crate) fn new(outcomes: Vec<Result<PositionReport, PollError>>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            outcomes: Mutex::new(outcomes.into()),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionFeed for ScriptedFeed {
    async fn latest(&self) -> Result<PositionReport, PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or(Err(PollError::Unavailable))
    }
}
