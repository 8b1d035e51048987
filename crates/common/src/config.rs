//! Tracker configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level tracker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Upstream position source.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Refresh cache policy.
    #[serde(default)]
    pub cache: CacheConfig,

    /// HTTP surface exposed to consumers.
    #[serde(default)]
    pub server: ServerConfig,

    /// Consumer poll loop.
    #[serde(default)]
    pub poller: PollerConfig,
}

/// Upstream endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// URL returning the current position document.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Max upstream requests per second. 0 disables the quota.
    #[serde(default = "default_max_requests_per_sec")]
    pub max_requests_per_sec: u32,
}

/// Cache freshness policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// A cached sample younger than this is served without an upstream call.
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Interval between heartbeat log lines.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

/// Consumer poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Run an in-process poller next to the server.
    #[serde(default)]
    pub enabled: bool,

    /// Tick interval in milliseconds, independent of `cache.max_age_ms`.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Per-poll request timeout in milliseconds when polling over HTTP.
    /// Separate from `upstream.timeout_ms`.
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,

    /// Base URL of a remote tracker to poll (used by `--watch`).
    #[serde(default = "default_poller_server_url")]
    pub server_url: String,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_upstream_url() -> String {
    "https://api.wheretheiss.at/v1/satellites/25544".into()
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_max_requests_per_sec() -> u32 {
    1
}
fn default_max_age_ms() -> u64 {
    1_000
}
fn default_bind_addr() -> String {
    "127.0.0.1:5000".into()
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_poll_timeout_ms() -> u64 {
    2_000
}
fn default_poller_server_url() -> String {
    "http://127.0.0.1:5000".into()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_ms: default_timeout_ms(),
            max_requests_per_sec: default_max_requests_per_sec(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_poll_interval_ms(),
            timeout_ms: default_poll_timeout_ms(),
            server_url: default_poller_server_url(),
        }
    }
}
