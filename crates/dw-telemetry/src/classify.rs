//! Field classification.
//!
//! Decides which schema fields are telemetry channels. A field qualifies iff
//! its declared type references a time-series-shaped record; scalars and
//! references to other record types are metadata.

use dw_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::sample::SampleSchema;

/// A qualifying field: where it sits in the schema and what metric it
/// publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name inside a `TelemetrySample`.
    pub name: String,
    /// External metric name; becomes the dataset column name.
    pub metric: String,
    /// Declaration position in the schema.
    pub position: usize,
}

/// Return the time-series fields of `schema` in declaration order.
///
/// Fails with `Error::Schema` when nothing qualifies; callers decide whether
/// that is fatal.
pub fn classify(schema: &SampleSchema) -> Result<Vec<FieldDescriptor>> {
    let fields: Vec<FieldDescriptor> = schema
        .fields
        .iter()
        .enumerate()
        .filter_map(|(position, spec)| {
            spec.value_type.series_metric().map(|metric| FieldDescriptor {
                name: spec.name.clone(),
                metric: metric.to_string(),
                position,
            })
        })
        .collect();

    if fields.is_empty() {
        return Err(Error::Schema(format!(
            "schema {} declares no time-series fields",
            schema.name
        )));
    }

    tracing::debug!(
        schema = %schema.name,
        declared = schema.fields.len(),
        classified = fields.len(),
        "classified telemetry fields"
    );
    Ok(fields)
}
