//! Read-facing position contract used by request handlers.

use std::time::Duration;

use crate::coordinator::{CachedPosition, RefreshCoordinator, Unavailable};

/// Serves the latest position, refreshing through the coordinator when the
/// cache is older than `max_age`. Holds no state of its own.
#[derive(Clone)]
pub struct PositionService {
    coordinator: RefreshCoordinator,
    max_age: Duration,
}

impl PositionService {
    pub fn new(coordinator: RefreshCoordinator, max_age: Duration) -> Self {
        Self {
            coordinator,
            max_age,
        }
    }

    /// Latest sample with its staleness flag, or `Unavailable` before the
    /// first successful fetch.
    pub async fn current_position(&self) -> Result<CachedPosition, Unavailable> {
        self.coordinator.get(self.max_age).await
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}
