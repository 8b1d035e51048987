//! Refresh/cache layer between the upstream position source and consumers.
//!
//! The `RefreshCoordinator` owns the single cached sample and coalesces
//! refreshes, `PositionService` is the read contract handed to request
//! handlers, and `Poller` is the consumer-side loop that keeps a trace.

pub mod coordinator;
pub mod feed;
pub mod http;
pub mod poller;
pub mod service;
pub mod trace;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{CachedPosition, CoordinatorStats, RefreshCoordinator, Unavailable};
pub use feed::{HttpFeed, PollError, PositionFeed};
pub use http::{router, serve};
pub use poller::{PollStatus, Poller, PollerHandle, PollerState};
pub use service::PositionService;
pub use trace::{Trace, TracePoint};
