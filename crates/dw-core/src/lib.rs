//! Drivewatch core: feature extraction and failure scoring.
//!
//! This crate provides:
//! - Canonical time index resolution with pluggable strategies
//! - Dense dataset assembly from telemetry samples
//! - Model invocation through the `ScoringModel` trait
//! - Keyed score history with replace-on-conflict upserts
//! - The run pipeline and its typestate lifecycle
//! - The binary failure rule and the historical refresh job
//! - The `dw-core` command-line interface

pub mod alert;
pub mod cli;
pub mod dataset;
pub mod exit_codes;
pub mod history;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod refresh;
pub mod score;

pub use alert::{AssetRegistry, DeviceStatus, FailureRule, MemoryAssetRegistry};
pub use dataset::{assemble, Dataset};
pub use exit_codes::ExitCode;
pub use history::{JsonScoreStore, MemoryScoreStore, ScoreHistoryWriter, ScoreStore, UpsertReport};
pub use index::{CanonicalIndex, FirstNonEmpty, IndexStrategy, ResolvedIndex, UnionOfFields};
pub use pipeline::{BatchWindow, Pipeline, RunError, RunOutcome, RunReport, RunStage};
pub use refresh::{MemorySource, RefreshJob, RefreshSummary, TelemetrySource};
pub use score::{score, LogisticModel, OutputColumn, ScoreSeries, ScoringModel};
