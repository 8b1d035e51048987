//! Core domain types shared across crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reported position reading of the tracked satellite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Degrees, in [-90, 90].
    pub latitude: f64,
    /// Degrees, in [-180, 180].
    pub longitude: f64,
    /// Kilometres above the surface.
    pub altitude: f64,
    /// Kilometres per hour.
    pub velocity: f64,
    /// Unix seconds as reported by the upstream source.
    pub timestamp: i64,
    /// Local wall time at which the fetch completed.
    pub fetched_at: DateTime<Utc>,
}

impl PositionSample {
    /// Check the physical bounds of every field.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("altitude", self.altitude),
            ("velocity", self.velocity),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(format!("{name} is not a finite number"));
            }
        }

        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} outside [-90, 90]", self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude {} outside [-180, 180]", self.longitude));
        }
        if self.altitude < 0.0 {
            return Err(format!("altitude {} is negative", self.altitude));
        }
        if self.velocity < 0.0 {
            return Err(format!("velocity {} is negative", self.velocity));
        }
        Ok(())
    }
}

/// Body of a successful `GET /position` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub velocity: f64,
    /// Upstream timestamp of the sample (Unix seconds).
    pub time: i64,
    /// True when a refresh failed and this is the last good sample.
    pub stale: bool,
}

impl PositionReport {
    pub fn from_sample(sample: &PositionSample, stale: bool) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            altitude: sample.altitude,
            velocity: sample.velocity,
            time: sample.timestamp,
            stale,
        }
    }
}

/// Body of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
