//! Binary failure status.
//!
//! Independent of scoring: the `failure` channel of the telemetry is a 0/1
//! flag reported by the fleet itself. When its most recent value exceeds the
//! threshold the device is marked failed in the asset registry. Delivering
//! that status anywhere else is somebody else's job.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use dw_common::{DeviceId, Error, Result};
use dw_config::PipelineConfig;
use dw_telemetry::{Point, TelemetrySample};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Telemetry field carrying the failure flag.
pub const FAILURE_FIELD: &str = "failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatusKind {
    Failed,
}

/// Registry record for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: DeviceId,
    pub status: DeviceStatusKind,
    pub failure_date: DateTime<Utc>,
}

/// Marks a device failed when its latest flag exceeds `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FailureRule {
    pub threshold: f64,
}

impl FailureRule {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.failure_threshold)
    }

    /// Status for `device`, or `None` when the most recent point is at or
    /// below the threshold (or there are no points).
    pub fn evaluate(&self, device: &DeviceId, series: &[Point]) -> Option<DeviceStatus> {
        let latest = series.iter().max_by_key(|p| p.timestamp)?;
        (latest.value > self.threshold).then(|| DeviceStatus {
            id: device.clone(),
            status: DeviceStatusKind::Failed,
            failure_date: latest.timestamp,
        })
    }
}

/// All points of `field` across a batch, in sample order.
pub fn failure_series(samples: &[TelemetrySample], field: &str) -> Vec<Point> {
    samples
        .iter()
        .filter_map(|s| s.series(field))
        .flat_map(|ts| ts.points().iter().copied())
        .collect()
}

/// Where device status is recorded.
pub trait AssetRegistry: Send + Sync {
    /// Merge `status` into the registry and return the stored record.
    ///
    /// An existing record keeps the earlier failure date.
    fn merge(&self, status: DeviceStatus) -> Result<DeviceStatus>;

    fn status(&self, device: &DeviceId) -> Result<Option<DeviceStatus>>;

    /// Every recorded status, ordered by device.
    fn all(&self) -> Result<Vec<DeviceStatus>>;
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct MemoryAssetRegistry {
    inner: RwLock<BTreeMap<DeviceId, DeviceStatus>>,
}

impl MemoryAssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Persistence {
        applied: 0,
        total: 1,
        reason: "asset registry lock poisoned".into(),
    }
}

impl AssetRegistry for MemoryAssetRegistry {
    fn merge(&self, status: DeviceStatus) -> Result<DeviceStatus> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let merged = match inner.get(&status.id) {
            Some(existing) if existing.failure_date <= status.failure_date => existing.clone(),
            _ => status,
        };
        info!(device = %merged.id, failure_date = %merged.failure_date, "device marked failed");
        inner.insert(merged.id.clone(), merged.clone());
        Ok(merged)
    }

    fn status(&self, device: &DeviceId) -> Result<Option<DeviceStatus>> {
        Ok(self.inner.read().map_err(|_| poisoned())?.get(device).cloned())
    }

    fn all(&self) -> Result<Vec<DeviceStatus>> {
        Ok(self.inner.read().map_err(|_| poisoned())?.values().cloned().collect())
    }
}
