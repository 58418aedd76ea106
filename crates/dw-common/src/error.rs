//! Error types for drivewatch.

use thiserror::Error;

/// Result type alias for drivewatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for drivewatch.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no metric mapping for telemetry column '{column}'")]
    UnmappedColumn { column: String },

    // Feature extraction errors (20-29)
    #[error("schema error: {0}")]
    Schema(String),

    #[error("no time-series data in batch")]
    IndexEmpty,

    #[error(
        "alignment error: field '{field}'{} has {actual} values, index expects {expected}",
        in_sample(.sample)
    )]
    Alignment {
        field: String,
        /// `None` when a whole column disagrees with the index.
        sample: Option<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("series '{field}' is not strictly increasing at point {position}")]
    InvalidSeries { field: String, position: usize },

    // Scoring errors (30-39)
    #[error("model output error: {0}")]
    ModelOutput(String),

    #[error("model failed: {0}")]
    Model(String),

    // Persistence errors (40-49)
    #[error("persistence error: applied {applied} of {total} scores: {reason}")]
    Persistence {
        applied: usize,
        total: usize,
        reason: String,
    },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn in_sample(sample: &Option<usize>) -> String {
    sample.map(|s| format!(" in sample {s}")).unwrap_or_default()
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::UnmappedColumn { .. } => 11,
            Error::Schema(_) => 20,
            Error::IndexEmpty => 21,
            Error::Alignment { .. } => 22,
            Error::InvalidSeries { .. } => 23,
            Error::ModelOutput(_) => 30,
            Error::Model(_) => 31,
            Error::Persistence { .. } => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Whether the error is a no-op condition rather than a failure.
    ///
    /// A batch without any time-series data produces no scores; callers
    /// treat it as a skipped run.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::IndexEmpty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_stage() {
        assert_eq!(Error::Schema("x".into()).code(), 20);
        assert_eq!(Error::IndexEmpty.code(), 21);
        assert_eq!(
            Error::Alignment {
                field: "smart_5".into(),
                sample: Some(0),
                expected: 1,
                actual: 0
            }
            .code(),
            22
        );
        assert_eq!(Error::ModelOutput("x".into()).code(), 30);
        assert_eq!(
            Error::Persistence {
                applied: 1,
                total: 2,
                reason: "x".into()
            }
            .code(),
            40
        );
    }

    #[test]
    fn only_index_empty_is_benign() {
        assert!(Error::IndexEmpty.is_benign());
        assert!(!Error::Schema("none".into()).is_benign());
        assert!(!Error::ModelOutput("rows".into()).is_benign());
    }

    #[test]
    fn alignment_message_names_field_and_sample() {
        let err = Error::Alignment {
            field: "smart_187".into(),
            sample: Some(2),
            expected: 3,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("smart_187"));
        assert!(msg.contains("sample 2"));

        let whole = Error::Alignment {
            field: "smart_187".into(),
            sample: None,
            expected: 3,
            actual: 2,
        };
        assert!(!whole.to_string().contains("sample"));
    }
}
