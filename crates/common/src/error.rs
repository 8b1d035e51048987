//! Error types for the ISS tracker.

use std::fmt;

use thiserror::Error;

/// Unified error type for configuration, I/O and serving failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Upstream fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Position feed error: {0}")]
    Feed(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure class of a single upstream fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Connection failure, timeout, or truncated body.
    Network,
    /// Upstream answered with a non-2xx status.
    Http,
    /// Body was not a well-formed position document.
    Parse,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::Http => "http",
            FetchErrorKind::Parse => "parse",
        };
        f.write_str(label)
    }
}

/// Error returned by the upstream client. Never shown to consumers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error: {detail}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub detail: String,
}

impl FetchError {
    pub fn network(detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Network,
            detail: detail.into(),
        }
    }

    pub fn http(detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Http,
            detail: detail.into(),
        }
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Parse,
            detail: detail.into(),
        }
    }
}
