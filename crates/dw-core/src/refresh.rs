//! Historical re-evaluation.
//!
//! Walks every device a source knows about, re-scores its samples inside a
//! window and re-applies the failure rule. Devices are independent: one
//! failing run is recorded in the summary and the job moves on.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc};
use dw_common::{DeviceId, Result};
use dw_config::RefreshWindow;
use dw_telemetry::TelemetrySample;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alert::{failure_series, AssetRegistry, FailureRule, FAILURE_FIELD};
use crate::pipeline::{BatchWindow, Pipeline, RunOutcome, RunStage};

/// Supplies samples per device.
pub trait TelemetrySource: Send + Sync {
    /// Known devices, sorted.
    fn devices(&self) -> Result<Vec<DeviceId>>;

    /// The device's samples whose data starts inside `window`, in order.
    fn samples(&self, device: &DeviceId, window: &RefreshWindow) -> Result<Vec<TelemetrySample>>;
}

fn bounds(window: &RefreshWindow) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        window.start.and_time(NaiveTime::MIN).and_utc(),
        window.end.and_time(NaiveTime::MIN).and_utc(),
    )
}

/// Samples held in memory, grouped by device in arrival order.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    by_device: BTreeMap<DeviceId, Vec<TelemetrySample>>,
}

impl MemorySource {
    pub fn from_samples(samples: impl IntoIterator<Item = TelemetrySample>) -> Self {
        let mut by_device: BTreeMap<DeviceId, Vec<TelemetrySample>> = BTreeMap::new();
        for sample in samples {
            by_device.entry(sample.device_id.clone()).or_default().push(sample);
        }
        Self { by_device }
    }
}

impl TelemetrySource for MemorySource {
    fn devices(&self) -> Result<Vec<DeviceId>> {
        Ok(self.by_device.keys().cloned().collect())
    }

    fn samples(&self, device: &DeviceId, window: &RefreshWindow) -> Result<Vec<TelemetrySample>> {
        let (start, end) = bounds(window);
        Ok(self
            .by_device
            .get(device)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.window().is_some_and(|(first, _)| first >= start && first < end))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// A device whose run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub device: DeviceId,
    pub stage: Option<RunStage>,
    pub code: u32,
    pub message: String,
}

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RefreshSummary {
    pub devices: usize,
    pub scored: usize,
    pub rows: usize,
    pub no_data: usize,
    pub skipped_current: usize,
    pub marked_failed: Vec<DeviceId>,
    pub errors: Vec<DeviceFailure>,
}

impl RefreshSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Re-scores a window for every device of a source.
pub struct RefreshJob<'a> {
    pipeline: &'a Pipeline,
    registry: &'a dyn AssetRegistry,
    rule: FailureRule,
    window: RefreshWindow,
    failure_field: String,
}

impl<'a> RefreshJob<'a> {
    pub fn new(
        pipeline: &'a Pipeline,
        registry: &'a dyn AssetRegistry,
        rule: FailureRule,
        window: RefreshWindow,
    ) -> Self {
        Self {
            pipeline,
            registry,
            rule,
            window,
            failure_field: FAILURE_FIELD.to_string(),
        }
    }

    pub fn failure_field(mut self, field: impl Into<String>) -> Self {
        self.failure_field = field.into();
        self
    }

    /// Whether the store already has a score at or after the batch end.
    fn is_current(&self, device: &DeviceId, batch: &BatchWindow) -> Result<bool> {
        let Some(end) = batch.end else {
            return Ok(false);
        };
        let history = self.pipeline.store().history(device)?;
        Ok(history.last().is_some_and(|p| p.timestamp >= end))
    }

    /// Run over every device. Only a failure to list devices aborts the job.
    pub fn run(&self, source: &dyn TelemetrySource) -> Result<RefreshSummary> {
        let devices = source.devices()?;
        info!(
            devices = devices.len(),
            start = %self.window.start,
            end = %self.window.end,
            force = self.window.force_reeval,
            "refresh started"
        );

        let mut summary = RefreshSummary {
            devices: devices.len(),
            ..RefreshSummary::default()
        };
        for device in &devices {
            if let Err(e) = self.refresh_device(source, device, &mut summary) {
                warn!(device = %device, error = %e, "refresh failed for device");
                summary.errors.push(DeviceFailure {
                    device: device.clone(),
                    stage: None,
                    code: e.code(),
                    message: e.to_string(),
                });
            }
        }

        info!(
            scored = summary.scored,
            no_data = summary.no_data,
            skipped = summary.skipped_current,
            failed_devices = summary.marked_failed.len(),
            errors = summary.errors.len(),
            "refresh finished"
        );
        Ok(summary)
    }

    fn refresh_device(
        &self,
        source: &dyn TelemetrySource,
        device: &DeviceId,
        summary: &mut RefreshSummary,
    ) -> Result<()> {
        let samples = source.samples(device, &self.window)?;

        if !self.window.force_reeval && self.is_current(device, &BatchWindow::of(&samples))? {
            debug!(device = %device, "history already covers window");
            summary.skipped_current += 1;
        } else {
            match self.pipeline.run(device, &samples) {
                Ok(report) => match report.outcome {
                    RunOutcome::Scored { rows, .. } => {
                        summary.scored += 1;
                        summary.rows += rows;
                    }
                    RunOutcome::NoData => summary.no_data += 1,
                },
                Err(e) => summary.errors.push(DeviceFailure {
                    device: device.clone(),
                    stage: Some(e.stage),
                    code: e.source.code(),
                    message: e.to_string(),
                }),
            }
        }

        let flags = failure_series(&samples, &self.failure_field);
        if let Some(status) = self.rule.evaluate(device, &flags) {
            self.registry.merge(status)?;
            summary.marked_failed.push(device.clone());
        }
        Ok(())
    }
}
