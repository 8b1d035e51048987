//! Configuration loader: merges env vars, .env file, and config.toml.

use common::{Error, TrackerConfig};
use std::path::Path;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_non_negative_u32(raw: &str, env_name: &str) -> Result<u32, Error> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn parse_bool(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered != "0" && lowered != "false" && lowered != "no" && lowered != "off"
}

fn is_http_url(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.starts_with("http://") || trimmed.starts_with("https://")
}

fn validate_config(config: &TrackerConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if !is_http_url(&config.upstream.url) {
        issues.push("upstream.url must be an http(s) URL".into());
    }
    if config.upstream.timeout_ms == 0 {
        issues.push("upstream.timeout_ms must be > 0".into());
    }
    if config.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        issues.push("server.bind_addr must be a socket address like 127.0.0.1:5000".into());
    }
    if config.server.heartbeat_secs == 0 {
        issues.push("server.heartbeat_secs must be > 0".into());
    }
    if config.poller.interval_ms == 0 {
        issues.push("poller.interval_ms must be > 0".into());
    }
    if config.poller.timeout_ms == 0 {
        issues.push("poller.timeout_ms must be > 0".into());
    }
    if !is_http_url(&config.poller.server_url) {
        issues.push("poller.server_url must be an http(s) URL".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply `ISS_*` overrides using `lookup` to read variables.
fn apply_env_overrides<F>(config: &mut TrackerConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("ISS_UPSTREAM_URL") {
        config.upstream.url = url.trim().to_string();
    }
    if let Some(raw) = lookup("ISS_FETCH_TIMEOUT_MS") {
        config.upstream.timeout_ms = parse_positive_u64(&raw, "ISS_FETCH_TIMEOUT_MS")?;
    }
    if let Some(raw) = lookup("ISS_UPSTREAM_MAX_RPS") {
        config.upstream.max_requests_per_sec = parse_non_negative_u32(&raw, "ISS_UPSTREAM_MAX_RPS")?;
    }
    if let Some(raw) = lookup("ISS_CACHE_MAX_AGE_MS") {
        // Zero is allowed: every request refreshes.
        config.cache.max_age_ms = raw
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::Config("ISS_CACHE_MAX_AGE_MS must be an integer >= 0".into()))?;
    }
    if let Some(addr) = lookup("ISS_BIND_ADDR") {
        config.server.bind_addr = addr.trim().to_string();
    }
    if let Some(raw) = lookup("ISS_POLL_INTERVAL_MS") {
        config.poller.interval_ms = parse_positive_u64(&raw, "ISS_POLL_INTERVAL_MS")?;
    }
    if let Some(raw) = lookup("ISS_POLLER_TIMEOUT_MS") {
        config.poller.timeout_ms = parse_positive_u64(&raw, "ISS_POLLER_TIMEOUT_MS")?;
    }
    if let Some(raw) = lookup("ISS_POLLER_ENABLED") {
        config.poller.enabled = parse_bool(&raw);
    }
    if let Some(url) = lookup("ISS_POLLER_SERVER_URL") {
        config.poller.server_url = url.trim().to_string();
    }
    Ok(())
}

/// Load tracker configuration from environment and optional config file.
pub fn load_config(config_path: &Path) -> Result<TrackerConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults, then the config file if it exists.
    let mut config = TrackerConfig::default();
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    }

    // 3. Environment variables take priority.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;
    Ok(config)
}
