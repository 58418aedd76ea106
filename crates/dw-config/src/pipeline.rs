//! Pipeline configuration types.
//!
//! A config file is a single JSON document. Every field except
//! `schema_version` has a default, so `{"schema_version": "1.0.0"}` is a
//! complete config.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::CONFIG_SCHEMA_VERSION;

/// Column of the model output holding the failure probability.
pub const DEFAULT_OUTPUT_COLUMN: &str = "1.0";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for dw_common::Error {
    fn from(err: ConfigError) -> Self {
        dw_common::Error::Config(err.to_string())
    }
}

/// How the assembler treats per-sample length mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Every sample's series must match its index segment exactly.
    #[default]
    Strict,
    /// Per-sample mismatches are tolerated as long as whole columns match
    /// the index length.
    Lenient,
}

/// Which canonical index strategy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStrategyKind {
    /// Adopt the clock of the first non-empty field.
    #[default]
    FirstNonEmpty,
    /// Per sample, the sorted union of all classified fields' timestamps.
    UnionOfFields,
}

/// Historical window re-evaluated by the refresh job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default = "default_force_reeval")]
    pub force_reeval: bool,
}

fn default_force_reeval() -> bool {
    true
}

impl Default for RefreshWindow {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2014, 4, 1).expect("constant date is valid"),
            end: NaiveDate::from_ymd_opt(2016, 7, 1).expect("constant date is valid"),
            force_reeval: true,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub schema_version: String,

    #[serde(default = "default_output_column")]
    pub output_column: String,

    #[serde(default)]
    pub alignment: AlignmentMode,

    #[serde(default)]
    pub index_strategy: IndexStrategyKind,

    /// Most recent failure-channel value must exceed this to mark a device
    /// failed.
    #[serde(default)]
    pub failure_threshold: f64,

    #[serde(default)]
    pub refresh: RefreshWindow,

    /// Score store location; `None` means the per-user data directory.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_output_column() -> String {
    DEFAULT_OUTPUT_COLUMN.to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            output_column: default_output_column(),
            alignment: AlignmentMode::default(),
            index_strategy: IndexStrategyKind::default(),
            failure_threshold: 0.0,
            refresh: RefreshWindow::default(),
            store_path: None,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Semantic validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !dw_common::schema::is_compatible(&self.schema_version) {
            return Err(ConfigError::Invalid(format!(
                "unsupported schema_version {} (current {})",
                self.schema_version, CONFIG_SCHEMA_VERSION
            )));
        }
        if self.output_column.trim().is_empty() {
            return Err(ConfigError::Invalid("output_column must not be empty".into()));
        }
        if !self.failure_threshold.is_finite() {
            return Err(ConfigError::Invalid(
                "failure_threshold must be finite".into(),
            ));
        }
        if self.refresh.start >= self.refresh.end {
            return Err(ConfigError::Invalid(format!(
                "refresh window start {} must be before end {}",
                self.refresh.start, self.refresh.end
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
