//! Arrow schemas for exported tables.
//!
//! Two tables leave the system as Parquet:
//! - `scores`: the score history, one row per (device, timestamp)
//! - `features`: a dump of one run's assembled dataset, for offline checks
//!
//! Timestamps are microseconds since the epoch, UTC.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

/// Exported table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableName {
    Scores,
    Features,
}

impl TableName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Scores => "scores",
            TableName::Features => "features",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

/// Schema of the `scores` table.
pub fn scores_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("device_id", DataType::Utf8, false),
        Field::new("timestamp", timestamp_type(), false),
        Field::new("score", DataType::Float64, false),
    ]))
}

/// Schema of a `features` dump: the row timestamp followed by one float
/// column per dataset column, in dataset order.
pub fn features_schema(columns: &[String]) -> SchemaRef {
    let mut fields = Vec::with_capacity(columns.len() + 1);
    fields.push(Field::new("timestamp", timestamp_type(), false));
    fields.extend(
        columns
            .iter()
            .map(|name| Field::new(name.as_str(), DataType::Float64, false)),
    );
    Arc::new(Schema::new(fields))
}
