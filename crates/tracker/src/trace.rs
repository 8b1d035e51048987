//! Consumer-side path of positions, kept for drawing the ground track.

use common::PositionReport;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TracePoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Upstream timestamp of the sample.
    pub time: i64,
}

/// Append-only ordered sequence of positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    points: Vec<TracePoint>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, report: &PositionReport) {
        self.points.push(TracePoint {
            latitude: report.latitude,
            longitude: report.longitude,
            time: report.time,
        });
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&TracePoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Split the path wherever it wraps across the antimeridian, so each run
    /// can be drawn as one polyline without a line spanning the whole map.
    pub fn segments(&self) -> Vec<&[TracePoint]> {
        let mut segments = Vec::new();
        let mut start = 0;
        for (i, pair) in self.points.windows(2).enumerate() {
            if (pair[1].longitude - pair[0].longitude).abs() > 180.0 {
                segments.push(&self.points[start..=i]);
                start = i + 1;
            }
        }
        if start < self.points.len() {
            segments.push(&self.points[start..]);
        }
        segments
    }
}
