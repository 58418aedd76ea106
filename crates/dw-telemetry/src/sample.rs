//! Telemetry samples and the schema describing them.
//!
//! A `TelemetrySample` is one device's readings for one bounded window: a
//! bag of named fields, each either a `TimeSeries` or explicitly null. The
//! `SampleSchema` is the metadata side: which fields exist and what type of
//! value each one declares. Samples never carry their own type information;
//! classification always goes through the schema.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use dw_common::{DeviceId, Error, Result};
use serde::{Deserialize, Serialize};

use crate::series::TimeSeries;

/// One device's readings for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: DeviceId,
    /// Field name → series. `None` marks a field reported as null.
    #[serde(default)]
    pub fields: BTreeMap<String, Option<TimeSeries>>,
}

impl TelemetrySample {
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_series(mut self, name: impl Into<String>, series: TimeSeries) -> Self {
        self.fields.insert(name.into(), Some(series));
        self
    }

    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into(), None);
        self
    }

    /// The series for a field, if present and non-null.
    pub fn series(&self, name: &str) -> Option<&TimeSeries> {
        self.fields.get(name).and_then(Option::as_ref)
    }

    /// Earliest and latest timestamp across all fields.
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut bounds: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        for series in self.fields.values().flatten() {
            let (Some(first), Some(last)) = (series.first(), series.last()) else {
                continue;
            };
            bounds = Some(match bounds {
                None => (first.timestamp, last.timestamp),
                Some((lo, hi)) => (lo.min(first.timestamp), hi.max(last.timestamp)),
            });
        }
        bounds
    }
}

/// Scalar value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Text,
    Integer,
    Double,
    Boolean,
    Date,
    DateTime,
}

/// Shape of a referenced record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RecordShape {
    /// A time-indexed series published under an external metric name.
    TimeSeries { metric: String },
    /// Any other structured record.
    Record,
}

/// A named record type a field may reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    #[serde(flatten)]
    pub shape: RecordShape,
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueType {
    Scalar { scalar: ScalarKind },
    Reference { target: RecordType },
}

impl ValueType {
    pub fn time_series(type_name: impl Into<String>, metric: impl Into<String>) -> Self {
        ValueType::Reference {
            target: RecordType {
                name: type_name.into(),
                shape: RecordShape::TimeSeries {
                    metric: metric.into(),
                },
            },
        }
    }

    /// External metric name when this type references a time series.
    pub fn series_metric(&self) -> Option<&str> {
        match self {
            ValueType::Reference {
                target:
                    RecordType {
                        shape: RecordShape::TimeSeries { metric },
                        ..
                    },
            } => Some(metric.as_str()),
            _ => None,
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub value_type: ValueType,
}

impl FieldSpec {
    pub fn scalar(name: impl Into<String>, scalar: ScalarKind) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::Scalar { scalar },
        }
    }

    pub fn series(name: impl Into<String>, metric: impl Into<String>) -> Self {
        let metric = metric.into();
        Self {
            name: name.into(),
            value_type: ValueType::time_series(format!("{metric}Series"), metric),
        }
    }
}

/// Fields of a sample type, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSchema {
    pub name: String,
    #[serde(default = "default_schema_version")]
    pub version: String,
    pub fields: Vec<FieldSpec>,
}

fn default_schema_version() -> String {
    crate::SCHEMA_VERSION.to_string()
}

impl SampleSchema {
    /// Build a schema, rejecting duplicate field names.
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Result<Self> {
        let schema = Self {
            name: name.into(),
            version: default_schema_version(),
            fields,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let schema: SampleSchema = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Field names must be unique, and so must the metrics of series
    /// fields (they become dataset column names).
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut metrics = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(Error::Schema(format!(
                    "field '{}' declared twice in {}",
                    field.name, self.name
                )));
            }
            if let Some(metric) = field.value_type.series_metric() {
                if !metrics.insert(metric) {
                    return Err(Error::Schema(format!(
                        "metric '{}' published by more than one field in {}",
                        metric, self.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Point;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn series_lookup_flattens_null() {
        let sample = TelemetrySample::new("Z300")
            .with_series(
                "smart_5",
                TimeSeries::new("smart_5", vec![Point::new(ts(1), 1.0)]).unwrap(),
            )
            .with_null("smart_187");
        assert!(sample.series("smart_5").is_some());
        assert!(sample.series("smart_187").is_none());
        assert!(sample.fields.contains_key("smart_187"));
        assert!(sample.series("missing").is_none());
    }

    #[test]
    fn window_spans_all_fields() {
        let sample = TelemetrySample::new("Z300")
            .with_series("a", TimeSeries::new("a", vec![Point::new(ts(2), 0.0)]).unwrap())
            .with_series(
                "b",
                TimeSeries::new("b", vec![Point::new(ts(1), 0.0), Point::new(ts(3), 0.0)]).unwrap(),
            )
            .with_series("c", TimeSeries::empty("c"));
        assert_eq!(sample.window(), Some((ts(1), ts(3))));
        assert_eq!(TelemetrySample::new("Z300").window(), None);
    }

    #[test]
    fn sample_json_accepts_null_fields() {
        let json = r#"{"device_id": "Z300", "fields": {
            "smart_5": {"field": "smart_5", "points": [{"timestamp": "2016-01-01T00:00:00Z", "value": 2.0}]},
            "smart_187": null
        }}"#;
        let sample: TelemetrySample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.device_id.as_str(), "Z300");
        assert_eq!(sample.fields.len(), 2);
        assert!(sample.series("smart_187").is_none());
    }

    #[test]
    fn schema_json_shape() {
        let json = r#"{"name": "DriveDay", "fields": [
            {"name": "serial_number", "value_type": {"kind": "scalar", "scalar": "text"}},
            {"name": "smart_5", "value_type": {"kind": "reference",
                "target": {"name": "Smart5Series", "shape": "time_series", "metric": "Smart5Raw"}}},
            {"name": "vendor", "value_type": {"kind": "reference",
                "target": {"name": "Vendor", "shape": "record"}}}
        ]}"#;
        let schema = SampleSchema::from_json(json).unwrap();
        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.fields[1].value_type.series_metric(), Some("Smart5Raw"));
        assert_eq!(schema.fields[2].value_type.series_metric(), None);
    }

    #[test]
    fn duplicate_field_rejected() {
        let err = SampleSchema::new(
            "DriveDay",
            vec![
                FieldSpec::series("smart_5", "A"),
                FieldSpec::scalar("smart_5", ScalarKind::Double),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn duplicate_series_metric_rejected() {
        let err = SampleSchema::new(
            "DriveDay",
            vec![
                FieldSpec::series("smart_5_raw", "Smart5Raw"),
                FieldSpec::series("smart_5_raw_v2", "Smart5Raw"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(ref msg) if msg.contains("Smart5Raw")));
    }
}
