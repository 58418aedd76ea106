//! Time series values.
//!
//! A `TimeSeries` is the value of one telemetry channel for one window.
//! Timestamps are strictly increasing; construction and deserialization both
//! enforce it, so downstream code can rely on it without re-checking.

use chrono::{DateTime, Utc};
use dw_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// One reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[derive(Deserialize)]
struct RawSeries {
    field: String,
    #[serde(default)]
    points: Vec<Point>,
}

/// Ordered readings of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct TimeSeries {
    field: String,
    points: Vec<Point>,
}

impl TryFrom<RawSeries> for TimeSeries {
    type Error = Error;

    fn try_from(raw: RawSeries) -> Result<Self> {
        TimeSeries::new(raw.field, raw.points)
    }
}

impl TimeSeries {
    /// Build a series, rejecting out-of-order or repeated timestamps.
    pub fn new(field: impl Into<String>, points: Vec<Point>) -> Result<Self> {
        let field = field.into();
        if let Some(position) = points
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(Error::InvalidSeries {
                field,
                position: position + 1,
            });
        }
        Ok(Self { field, points })
    }

    pub fn empty(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            points: Vec::new(),
        }
    }

    /// Field (channel) this series belongs to.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.points.iter().map(|p| p.timestamp)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    pub fn first(&self) -> Option<&Point> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }
}
