//! Exit codes for the dw-core CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing.
//! They are stable.

use dw_common::Error;

use crate::pipeline::RunError;

/// Exit codes for dw-core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Clean = 0,

    /// Nothing to score (no time-series data in the batch)
    NoData = 1,

    /// Some devices failed during a refresh
    PartialFail = 3,

    /// Configuration error
    ConfigError = 10,

    /// Bad input: schema, samples, alignment
    InputError = 11,

    /// Model failed or returned unusable output
    ScoringError = 12,

    /// I/O error
    IoError = 13,

    /// Scores could not be persisted
    PersistenceError = 14,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::NoData)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Exit code for a pipeline error.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Config(_) | Error::UnmappedColumn { .. } => ExitCode::ConfigError,
            Error::Schema(_)
            | Error::Alignment { .. }
            | Error::InvalidSeries { .. }
            | Error::Json(_) => ExitCode::InputError,
            Error::IndexEmpty => ExitCode::NoData,
            Error::ModelOutput(_) | Error::Model(_) => ExitCode::ScoringError,
            Error::Persistence { .. } => ExitCode::PersistenceError,
            Error::Io(_) => ExitCode::IoError,
        }
    }
}

impl From<&RunError> for ExitCode {
    fn from(err: &RunError) -> Self {
        ExitCode::from_error(&err.source)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}
