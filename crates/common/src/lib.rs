//! Shared types, config, and error definitions for the ISS tracker.

pub mod config;
pub mod error;
pub mod types;

pub use config::TrackerConfig;
pub use error::{Error, FetchError, FetchErrorKind};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
