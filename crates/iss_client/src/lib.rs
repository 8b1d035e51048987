//! Upstream position client.
//!
//! Issues a single bounded-timeout GET against the configured position
//! endpoint and parses the body into a `PositionSample`. Retry and caching
//! policy live in the refresh coordinator, not here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::UpstreamConfig;
use common::{Error, FetchError, PositionSample};
use serde::Deserialize;
use tracing::debug;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Anything that can produce the current position of the tracked object.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn fetch(&self) -> Result<PositionSample, FetchError>;
}

/// HTTP client for the upstream position endpoint.
#[derive(Debug, Clone)]
pub struct IssClient {
    client: reqwest::Client,
    url: String,
}

/// Position document returned by the upstream endpoint. Extra fields are ignored.
#[derive(Debug, Deserialize)]
pub struct PositionDocument {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub velocity: f64,
    pub timestamp: i64,
}

impl IssClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("iss-tracker/0.1")
            .pool_max_idle_per_host(2)
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build upstream HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PositionSource for IssClient {
    async fn fetch(&self) -> Result<PositionSample, FetchError> {
        debug!("Fetching upstream position: {}", self.url);

        let resp = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::network(describe_transport_error(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::http(format!(
                "upstream returned {}: {}",
                status.as_u16(),
                truncate(&body)
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::network(describe_transport_error(&e)))?;

        parse_position(&body, Utc::now())
    }
}

/// Parse an upstream body into a validated sample stamped with `fetched_at`.
pub fn parse_position(body: &str, fetched_at: DateTime<Utc>) -> Result<PositionSample, FetchError> {
    let doc: PositionDocument = serde_json::from_str(body)
        .map_err(|e| FetchError::parse(format!("malformed position document: {e}")))?;

    let sample = PositionSample {
        latitude: doc.latitude,
        longitude: doc.longitude,
        altitude: doc.altitude,
        velocity: doc.velocity,
        timestamp: doc.timestamp,
        fetched_at,
    };
    sample.validate().map_err(FetchError::parse)?;

    debug!(
        "Parsed position lat={:.4} lon={:.4} alt={:.1}km ts={}",
        sample.latitude, sample.longitude, sample.altitude, sample.timestamp
    );
    Ok(sample)
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
