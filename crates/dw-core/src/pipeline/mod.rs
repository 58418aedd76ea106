//! The feature-extraction-and-scoring pipeline.
//!
//! One [`Pipeline`] holds everything a run needs (schema, index strategy,
//! alignment mode, model, output column and store) and is shared by
//! reference across threads. Each call to [`Pipeline::run`] scores one
//! device's batch: classify → resolve index → assemble → score → persist.
//! Runs do not share state beyond the store.

pub mod typestate;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dw_common::{DeviceId, Error, RunId};
use dw_config::{AlignmentMode, IndexStrategyKind, PipelineConfig};
use dw_telemetry::{SampleSchema, TelemetrySample};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, info_span, warn};

use crate::dataset::Dataset;
use crate::history::{ScoreHistoryWriter, ScoreStore, UpsertReport};
use crate::index::{strategy_for, IndexStrategy};
use crate::score::{OutputColumn, ScoringModel};
use typestate::PipelineRun;

/// Runtime view of where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Classified,
    IndexResolved,
    Assembled,
    Scored,
    Persisted,
    Failed,
}

impl RunState {
    /// Stage that runs from this state, if any.
    pub fn next_stage(self) -> Option<RunStage> {
        match self {
            RunState::Idle => Some(RunStage::Classify),
            RunState::Classified => Some(RunStage::ResolveIndex),
            RunState::IndexResolved => Some(RunStage::Assemble),
            RunState::Assembled => Some(RunStage::Score),
            RunState::Scored => Some(RunStage::Persist),
            RunState::Persisted | RunState::Failed => None,
        }
    }
}

/// A pipeline stage, as reported on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Classify,
    ResolveIndex,
    Assemble,
    Score,
    Persist,
}

impl RunStage {
    pub fn operation(self) -> &'static str {
        match self {
            RunStage::Classify => "classify",
            RunStage::ResolveIndex => "resolve_index",
            RunStage::Assemble => "assemble",
            RunStage::Score => "score",
            RunStage::Persist => "persist",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// Time span and size of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub samples: usize,
}

impl BatchWindow {
    /// Earliest and latest timestamp across every sample of the batch.
    pub fn of(samples: &[TelemetrySample]) -> Self {
        let bounds = samples.iter().filter_map(TelemetrySample::window);
        let (start, end) = bounds.fold((None, None), |(lo, hi), (s, e)| {
            (
                Some(lo.map_or(s, |lo: DateTime<Utc>| lo.min(s))),
                Some(hi.map_or(e, |hi: DateTime<Utc>| hi.max(e))),
            )
        });
        Self {
            start,
            end,
            samples: samples.len(),
        }
    }
}

impl fmt::Display for BatchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.start, self.end) {
            (Some(s), Some(e)) => write!(
                f,
                "{}..{} ({} samples)",
                s.to_rfc3339(),
                e.to_rfc3339(),
                self.samples
            ),
            _ => write!(f, "no data ({} samples)", self.samples),
        }
    }
}

/// A failed run, with enough context to find the batch again.
#[derive(Debug, Error)]
#[error("run {run_id} for device {device} failed at {stage} over {window}: {source}")]
pub struct RunError {
    pub run_id: RunId,
    pub device: DeviceId,
    pub window: BatchWindow,
    pub stage: RunStage,
    #[source]
    pub source: Error,
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Scored { rows: usize, applied: usize },
    /// No classified field had data; nothing was scored or written.
    NoData,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub device: DeviceId,
    pub window: BatchWindow,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<UpsertReport>,
}

impl RunReport {
    pub fn rows(&self) -> usize {
        match self.outcome {
            RunOutcome::Scored { rows, .. } => rows,
            RunOutcome::NoData => 0,
        }
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    schema: SampleSchema,
    model: Arc<dyn ScoringModel>,
    store: Arc<dyn ScoreStore>,
    strategy: Box<dyn IndexStrategy>,
    alignment: AlignmentMode,
    output: OutputColumn,
}

impl PipelineBuilder {
    pub fn index_strategy(mut self, strategy: Box<dyn IndexStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn alignment(mut self, mode: AlignmentMode) -> Self {
        self.alignment = mode;
        self
    }

    pub fn output_column(mut self, column: OutputColumn) -> Self {
        self.output = column;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            schema: self.schema,
            model: self.model,
            store: self.store,
            strategy: self.strategy,
            alignment: self.alignment,
            output: self.output,
        }
    }
}

/// A configured pipeline.
pub struct Pipeline {
    schema: SampleSchema,
    model: Arc<dyn ScoringModel>,
    store: Arc<dyn ScoreStore>,
    strategy: Box<dyn IndexStrategy>,
    alignment: AlignmentMode,
    output: OutputColumn,
}

impl Pipeline {
    /// Start from defaults: first-non-empty index, strict alignment, column
    /// `"1.0"`.
    pub fn builder(
        schema: SampleSchema,
        model: Arc<dyn ScoringModel>,
        store: Arc<dyn ScoreStore>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            schema,
            model,
            store,
            strategy: strategy_for(IndexStrategyKind::default()),
            alignment: AlignmentMode::default(),
            output: OutputColumn::default(),
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        schema: SampleSchema,
        model: Arc<dyn ScoringModel>,
        store: Arc<dyn ScoreStore>,
    ) -> Self {
        Self::builder(schema, model, store)
            .index_strategy(strategy_for(config.index_strategy))
            .alignment(config.alignment)
            .output_column(OutputColumn::Name(config.output_column.clone()))
            .build()
    }

    pub fn schema(&self) -> &SampleSchema {
        &self.schema
    }

    pub fn store(&self) -> &dyn ScoreStore {
        self.store.as_ref()
    }

    /// Score one device's batch and upsert the scores.
    ///
    /// `samples` are taken in the given order and must all belong to
    /// `device`. A batch with no data for any classified field ends with
    /// [`RunOutcome::NoData`]: the model is not called and nothing is
    /// written.
    pub fn run(
        &self,
        device: &DeviceId,
        samples: &[TelemetrySample],
    ) -> Result<RunReport, RunError> {
        let run = PipelineRun::new(device.clone(), samples);
        let span = info_span!(
            "pipeline_run",
            run_id = %run.data().run_id,
            device = %device,
            samples = samples.len()
        );
        let _guard = span.enter();

        let result = self.drive(run, samples);
        match &result {
            Ok(report) => info!(rows = report.rows(), outcome = ?report.outcome, "run finished"),
            Err(e) => warn!(
                stage = %e.stage,
                code = e.source.code(),
                error = %e.source,
                "run failed"
            ),
        }
        result
    }

    fn drive(
        &self,
        run: PipelineRun<typestate::Idle>,
        samples: &[TelemetrySample],
    ) -> Result<RunReport, RunError> {
        let resolved = run
            .classify(&self.schema, samples)
            .map_err(|f| f.into_error())?
            .resolve_index(samples, self.strategy.as_ref());

        if !resolved.has_rows() {
            let data = resolved.finish_empty();
            return Ok(RunReport {
                run_id: data.run_id,
                device: data.device,
                window: data.window,
                outcome: RunOutcome::NoData,
                upsert: None,
            });
        }

        let writer = ScoreHistoryWriter::new(self.store.as_ref());
        let (data, rows, upsert) = resolved
            .assemble(samples, self.alignment)
            .and_then(|r| r.score(self.model.as_ref(), &self.output))
            .and_then(|r| r.persist(&writer))
            .map_err(|f| f.into_error())?
            .finish();

        Ok(RunReport {
            run_id: data.run_id,
            device: data.device,
            window: data.window,
            outcome: RunOutcome::Scored {
                rows,
                applied: upsert.applied,
            },
            upsert: Some(upsert),
        })
    }

    /// Classify, resolve and assemble without scoring.
    ///
    /// An empty index yields an empty dataset with the classified columns.
    pub fn features(
        &self,
        device: &DeviceId,
        samples: &[TelemetrySample],
    ) -> Result<Dataset, RunError> {
        let resolved = PipelineRun::new(device.clone(), samples)
            .classify(&self.schema, samples)
            .map_err(|f| f.into_error())?
            .resolve_index(samples, self.strategy.as_ref());
        if !resolved.has_rows() {
            let columns = resolved.fields().iter().map(|f| f.metric.clone()).collect();
            return Ok(Dataset::empty(columns));
        }
        let (_, dataset) = resolved
            .assemble(samples, self.alignment)
            .map_err(|f| f.into_error())?
            .into_dataset();
        Ok(dataset)
    }
}
