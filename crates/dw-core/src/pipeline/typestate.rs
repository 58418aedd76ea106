//! Typestate run lifecycle.
//!
//! Encodes the run state machine at the type level so stages cannot be
//! skipped or reordered. Each phase type carries what the previous stage
//! produced, and `PipelineRun<S>` can only advance through methods that
//! consume the old phase and return the next one.
//!
//! # State Machine
//!
//! ```text
//! Idle ──▶ Classified ──▶ IndexResolved ──▶ Assembled ──▶ Scored ──▶ Persisted
//!   │                          │                │            │           │
//!   ▼                          ▼                ▼            ▼           ▼
//! Failed                  (empty index)       Failed      Failed    report
//!                         report, no write
//! ```
//!
//! Fallible transitions return [`Transition`]: the next phase, or the run in
//! its terminal `Failed` phase holding the error and the stage that raised it.
//! `RunState` is the runtime mirror used for logging and reports.

use dw_common::{DeviceId, Error, RunId};
use dw_config::AlignmentMode;
use dw_telemetry::{classify, FieldDescriptor, SampleSchema, TelemetrySample};

use super::{BatchWindow, RunError, RunStage, RunState};
use crate::dataset::{assemble, Dataset};
use crate::history::{ScoreHistoryWriter, UpsertReport};
use crate::index::{IndexStrategy, ResolvedIndex};
use crate::score::{score, OutputColumn, ScoreSeries, ScoringModel};

// ── Phase marker trait ──────────────────────────────────────────────────

/// Marker trait for run phases. Sealed to prevent external implementation.
pub trait RunPhase: sealed::Sealed {
    /// The corresponding runtime `RunState` variant.
    fn runtime_state() -> RunState;
    fn name() -> &'static str;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Idle {}
    impl Sealed for super::Classified {}
    impl Sealed for super::IndexResolved {}
    impl Sealed for super::Assembled {}
    impl Sealed for super::Scored {}
    impl Sealed for super::Persisted {}
    impl Sealed for super::Failed {}
}

// ── Phase types ─────────────────────────────────────────────────────────

/// Nothing has run yet.
#[derive(Debug, Clone, Copy)]
pub struct Idle;

/// Telemetry fields are known.
#[derive(Debug, Clone)]
pub struct Classified {
    fields: Vec<FieldDescriptor>,
}

/// The canonical index is fixed.
#[derive(Debug, Clone)]
pub struct IndexResolved {
    fields: Vec<FieldDescriptor>,
    resolved: ResolvedIndex,
}

/// The feature matrix is built.
#[derive(Debug, Clone)]
pub struct Assembled {
    dataset: Dataset,
}

/// The model has produced scores.
#[derive(Debug, Clone)]
pub struct Scored {
    rows: usize,
    scores: ScoreSeries,
}

/// Scores are in the store.
#[derive(Debug, Clone)]
pub struct Persisted {
    rows: usize,
    report: UpsertReport,
}

/// The run failed. Terminal.
#[derive(Debug)]
pub struct Failed {
    stage: RunStage,
    error: Error,
}

macro_rules! phase {
    ($ty:ty, $state:ident, $name:literal) => {
        impl RunPhase for $ty {
            fn runtime_state() -> RunState {
                RunState::$state
            }
            fn name() -> &'static str {
                $name
            }
        }
    };
}

phase!(Idle, Idle, "idle");
phase!(Classified, Classified, "classified");
phase!(IndexResolved, IndexResolved, "index_resolved");
phase!(Assembled, Assembled, "assembled");
phase!(Scored, Scored, "scored");
phase!(Persisted, Persisted, "persisted");
phase!(Failed, Failed, "failed");

// ── Run data ────────────────────────────────────────────────────────────

/// Identity of a run, shared by every phase.
#[derive(Debug, Clone)]
pub struct RunData {
    pub run_id: RunId,
    pub device: DeviceId,
    pub window: BatchWindow,
}

// ── Typed run ───────────────────────────────────────────────────────────

/// A run with compile-time phase tracking.
#[derive(Debug)]
pub struct PipelineRun<S: RunPhase> {
    data: RunData,
    phase: S,
}

/// Outcome of a fallible transition.
pub type Transition<S> = Result<PipelineRun<S>, PipelineRun<Failed>>;

impl<S: RunPhase> PipelineRun<S> {
    pub fn data(&self) -> &RunData {
        &self.data
    }

    pub fn runtime_state(&self) -> RunState {
        S::runtime_state()
    }

    pub fn phase_name(&self) -> &'static str {
        S::name()
    }

    fn advance<T: RunPhase>(self, phase: T) -> PipelineRun<T> {
        PipelineRun {
            data: self.data,
            phase,
        }
    }

    fn fail(self, error: Error) -> PipelineRun<Failed> {
        // Every non-terminal phase has a next stage; Failed never calls this.
        let stage = S::runtime_state().next_stage().unwrap_or(RunStage::Persist);
        self.advance(Failed { stage, error })
    }
}

// ── Idle ────────────────────────────────────────────────────────────────

impl PipelineRun<Idle> {
    pub fn new(device: DeviceId, samples: &[TelemetrySample]) -> Self {
        Self {
            data: RunData {
                run_id: RunId::new(),
                device,
                window: BatchWindow::of(samples),
            },
            phase: Idle,
        }
    }

    /// Transition: Idle → Classified.
    ///
    /// Every sample must belong to the run's device.
    pub fn classify(
        self,
        schema: &SampleSchema,
        samples: &[TelemetrySample],
    ) -> Transition<Classified> {
        if let Some((position, sample)) = samples
            .iter()
            .enumerate()
            .find(|(_, s)| s.device_id != self.data.device)
        {
            let error = Error::Schema(format!(
                "sample {position} belongs to device {}, batch is for {}",
                sample.device_id, self.data.device
            ));
            return Err(self.fail(error));
        }
        match classify(schema) {
            Ok(fields) => Ok(self.advance(Classified { fields })),
            Err(e) => Err(self.fail(e)),
        }
    }
}

// ── Classified ──────────────────────────────────────────────────────────

impl PipelineRun<Classified> {
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.phase.fields
    }

    /// Transition: Classified → IndexResolved. Cannot fail.
    pub fn resolve_index(
        self,
        samples: &[TelemetrySample],
        strategy: &dyn IndexStrategy,
    ) -> PipelineRun<IndexResolved> {
        let resolved = strategy.resolve(samples, &self.phase.fields);
        let fields = self.phase.fields.clone();
        self.advance(IndexResolved { fields, resolved })
    }
}

// ── IndexResolved ───────────────────────────────────────────────────────

impl PipelineRun<IndexResolved> {
    pub fn resolved(&self) -> &ResolvedIndex {
        &self.phase.resolved
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.phase.fields
    }

    /// Whether the index has rows. An empty index ends the run here.
    pub fn has_rows(&self) -> bool {
        !self.phase.resolved.index.is_empty()
    }

    /// Transition: IndexResolved → Assembled.
    pub fn assemble(
        self,
        samples: &[TelemetrySample],
        mode: AlignmentMode,
    ) -> Transition<Assembled> {
        match assemble(samples, &self.phase.fields, &self.phase.resolved.index, mode) {
            Ok(dataset) => Ok(self.advance(Assembled { dataset })),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Finish a run whose index is empty. Nothing was scored or written.
    pub fn finish_empty(self) -> RunData {
        self.data
    }
}

// ── Assembled ───────────────────────────────────────────────────────────

impl PipelineRun<Assembled> {
    pub fn dataset(&self) -> &Dataset {
        &self.phase.dataset
    }

    pub fn into_dataset(self) -> (RunData, Dataset) {
        (self.data, self.phase.dataset)
    }

    /// Transition: Assembled → Scored.
    pub fn score(self, model: &dyn ScoringModel, column: &OutputColumn) -> Transition<Scored> {
        match score(&self.phase.dataset, model, column) {
            Ok(scores) => {
                let rows = self.phase.dataset.rows();
                Ok(self.advance(Scored { rows, scores }))
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

// ── Scored ──────────────────────────────────────────────────────────────

impl PipelineRun<Scored> {
    pub fn scores(&self) -> &ScoreSeries {
        &self.phase.scores
    }

    /// Transition: Scored → Persisted.
    pub fn persist(self, writer: &ScoreHistoryWriter<'_>) -> Transition<Persisted> {
        match writer.upsert(&self.data.device, &self.phase.scores) {
            Ok(report) => {
                let rows = self.phase.rows;
                Ok(self.advance(Persisted { rows, report }))
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

// ── Terminal phases ─────────────────────────────────────────────────────

impl PipelineRun<Persisted> {
    pub fn report(&self) -> &UpsertReport {
        &self.phase.report
    }

    /// Finish the run, returning its identity, row count and upsert report.
    pub fn finish(self) -> (RunData, usize, UpsertReport) {
        (self.data, self.phase.rows, self.phase.report)
    }
}

impl PipelineRun<Failed> {
    pub fn stage(&self) -> RunStage {
        self.phase.stage
    }

    pub fn error(&self) -> &Error {
        &self.phase.error
    }

    pub fn into_error(self) -> RunError {
        RunError {
            run_id: self.data.run_id,
            device: self.data.device,
            window: self.data.window,
            stage: self.phase.stage,
            source: self.phase.error,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
