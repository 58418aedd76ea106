//! Column-to-metric lookup table.
//!
//! Raw drive-stats records name their columns after the CSV headers
//! (`smart_187_raw`, `capacity_bytes`, ...). Everything downstream of the
//! canonical transforms speaks metric names (`Smart187Raw`, ...). This table
//! is the single place the two vocabularies meet.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::ConfigError;

/// SMART attribute ids reported in the drive-stats data set.
const SMART_ATTRIBUTES: &[u32] = &[
    1, 2, 3, 4, 5, 7, 8, 9, 10, 11, 12, 13, 15, 22, 183, 184, 187, 188, 189, 190, 191, 192, 193,
    194, 195, 196, 197, 198, 199, 200, 201, 220, 222, 223, 224, 225, 226, 240, 241, 242, 250, 251,
    252, 254, 255,
];

/// Whether a raw column carries telemetry (as opposed to identity or
/// bookkeeping fields like `serial_number` and `date`).
pub fn is_telemetry_column(column: &str) -> bool {
    column.contains("smart") || column.contains("failure") || column.contains("bytes")
}

/// One row of the lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetric {
    pub column: String,
    pub metric: String,
}

impl ColumnMetric {
    pub fn new(column: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            metric: metric.into(),
        }
    }
}

/// Ordered column → metric table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub entries: Vec<ColumnMetric>,
}

impl ColumnMapping {
    /// Build a table, rejecting duplicate columns or metrics.
    pub fn from_entries(entries: Vec<ColumnMetric>) -> Result<Self, ConfigError> {
        let mapping = Self { entries };
        mapping.validate()?;
        Ok(mapping)
    }

    /// The table for the public drive-stats column layout.
    pub fn drive_stats() -> Self {
        let mut entries = vec![
            ColumnMetric::new("capacity_bytes", "CapacityBytes"),
            ColumnMetric::new("failure", "Failure"),
        ];
        for id in SMART_ATTRIBUTES {
            entries.push(ColumnMetric::new(
                format!("smart_{id}_normalized"),
                format!("Smart{id}Normalized"),
            ));
            entries.push(ColumnMetric::new(
                format!("smart_{id}_raw"),
                format!("Smart{id}Raw"),
            ));
        }
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mapping: ColumnMapping = serde_json::from_str(json)?;
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut columns = HashSet::new();
        let mut metrics = HashSet::new();
        for entry in &self.entries {
            if entry.column.is_empty() || entry.metric.is_empty() {
                return Err(ConfigError::Invalid(
                    "mapping entries need a column and a metric".into(),
                ));
            }
            if !columns.insert(entry.column.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "column '{}' mapped twice",
                    entry.column
                )));
            }
            if !metrics.insert(entry.metric.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "metric '{}' mapped twice",
                    entry.metric
                )));
            }
        }
        Ok(())
    }

    /// Metric name for a raw column.
    pub fn metric_for(&self, column: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.column == column)
            .map(|e| e.metric.as_str())
    }

    /// Entries whose column carries telemetry, in table order.
    pub fn telemetry_entries(&self) -> impl Iterator<Item = &ColumnMetric> {
        self.entries.iter().filter(|e| is_telemetry_column(&e.column))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self::drive_stats()
    }
}
