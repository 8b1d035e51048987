//! Where the consumer poller gets its positions from.

use std::time::Duration;

use async_trait::async_trait;
use common::{Error, PositionReport};
use reqwest::StatusCode;
use thiserror::Error;

use crate::service::PositionService;

/// Why a single poll produced no position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The tracker has no sample yet; try again next tick.
    #[error("no position data available yet")]
    Unavailable,
    #[error("position request failed: {0}")]
    Transport(String),
}

/// Source of the latest position as seen by a consumer.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    async fn latest(&self) -> Result<PositionReport, PollError>;
}

#[async_trait]
impl PositionFeed for PositionService {
    async fn latest(&self) -> Result<PositionReport, PollError> {
        self.current_position()
            .await
            .map(|cached| PositionReport::from_sample(&cached.sample, cached.stale))
            .map_err(|_| PollError::Unavailable)
    }
}

/// Polls a remote tracker over `GET /position`.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpFeed {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Feed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/position", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PositionFeed for HttpFeed {
    async fn latest(&self) -> Result<PositionReport, PollError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        match resp.status() {
            StatusCode::SERVICE_UNAVAILABLE => Err(PollError::Unavailable),
            status if !status.is_success() => {
                Err(PollError::Transport(format!("tracker returned {status}")))
            }
            _ => resp
                .json::<PositionReport>()
                .await
                .map_err(|e| PollError::Transport(format!("bad position body: {e}"))),
        }
    }
}
