//! Canonical transforms for raw drive-day records.
//!
//! Drive-stats data arrives as one flat record per drive per day:
//!
//! ```text
//! date, serial_number, model, capacity_bytes, failure, smart_1_normalized, smart_1_raw, ...
//! ```
//!
//! These transforms reshape such records into the three forms the rest of
//! the system consumes: measurement series descriptors (one per drive and
//! metric), individual measurements (one per drive, metric and day), and
//! `TelemetrySample`s for the scoring pipeline. Only telemetry columns (see
//! [`is_telemetry_column`]) are carried; every one of them must be present
//! in the column mapping.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use dw_common::{DeviceId, Error, Result};
use dw_config::{is_telemetry_column, ColumnMapping, ColumnMetric};
use serde::{Deserialize, Serialize};

use crate::sample::{FieldSpec, SampleSchema, ScalarKind, TelemetrySample};
use crate::series::{Point, TimeSeries};

/// Unit attached to every drive-stats measurement series.
pub const DIMENSIONLESS: &str = "dimensionless";

/// Name of the schema produced by [`drive_schema`].
pub const DRIVE_SCHEMA_NAME: &str = "DriveDay";

/// One raw drive-stats row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveDayRecord {
    pub date: NaiveDate,
    pub serial_number: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Every other column. Empty cells are `null`.
    #[serde(flatten)]
    pub readings: BTreeMap<String, Option<f64>>,
}

impl DriveDayRecord {
    /// Start of the record's one-day window (00:00 UTC).
    pub fn window_start(&self) -> DateTime<Utc> {
        self.date.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_start() + Duration::days(1)
    }

    /// Telemetry columns with their metric names, in column order.
    fn telemetry<'a>(
        &'a self,
        mapping: &'a ColumnMapping,
    ) -> impl Iterator<Item = Result<(&'a str, &'a str, Option<f64>)>> + 'a {
        self.readings
            .iter()
            .filter(|(column, _)| is_telemetry_column(column))
            .map(move |(column, value)| {
                let metric = mapping.metric_for(column).ok_or_else(|| Error::UnmappedColumn {
                    column: column.clone(),
                })?;
                Ok((column.as_str(), metric, *value))
            })
    }
}

/// How a series aggregates over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    Rate,
    Integral,
    Average,
}

/// Descriptor of one drive's series for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSeries {
    /// `<serial>_<metric>`
    pub id: String,
    pub name: String,
    pub asset_id: DeviceId,
    pub measurement_type: String,
    pub treatment: Treatment,
    pub unit: String,
}

/// One reading attached to a measurement series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Id of the owning [`MeasurementSeries`].
    pub parent: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: Option<f64>,
}

fn series_id(serial: &str, metric: &str) -> String {
    format!("{serial}_{metric}")
}

/// Series descriptors for every telemetry column of a record.
pub fn to_measurement_series(
    record: &DriveDayRecord,
    mapping: &ColumnMapping,
) -> Result<Vec<MeasurementSeries>> {
    record
        .telemetry(mapping)
        .map(|entry| {
            let (_, metric, _) = entry?;
            Ok(MeasurementSeries {
                id: series_id(&record.serial_number, metric),
                name: metric.to_string(),
                asset_id: DeviceId::new(record.serial_number.clone()),
                measurement_type: metric.to_string(),
                treatment: Treatment::Rate,
                unit: DIMENSIONLESS.to_string(),
            })
        })
        .collect()
}

/// One-day measurements for every telemetry column of a record.
pub fn to_measurements(
    record: &DriveDayRecord,
    mapping: &ColumnMapping,
) -> Result<Vec<Measurement>> {
    let start = record.window_start();
    let end = record.window_end();
    tracing::trace!(
        serial = %record.serial_number,
        %start,
        %end,
        "transforming drive-day record"
    );
    record
        .telemetry(mapping)
        .map(|entry| {
            let (_, metric, value) = entry?;
            Ok(Measurement {
                parent: series_id(&record.serial_number, metric),
                start,
                end,
                value,
            })
        })
        .collect()
}

/// One telemetry sample per record, preserving record order.
///
/// Each telemetry column becomes a field holding a single point at the
/// window start; an empty cell becomes a null field.
pub fn samples_from_records(
    records: &[DriveDayRecord],
    mapping: &ColumnMapping,
) -> Result<Vec<TelemetrySample>> {
    records
        .iter()
        .map(|record| {
            let start = record.window_start();
            let mut sample = TelemetrySample::new(record.serial_number.clone());
            for entry in record.telemetry(mapping) {
                let (column, _, value) = entry?;
                sample = match value {
                    Some(v) => sample.with_series(
                        column,
                        TimeSeries::new(column, vec![Point::new(start, v)])?,
                    ),
                    None => sample.with_null(column),
                };
            }
            Ok(sample)
        })
        .collect()
}

/// Schema declaring every telemetry column of `mapping`.
pub fn drive_schema(mapping: &ColumnMapping) -> Result<SampleSchema> {
    schema_with(mapping.telemetry_entries())
}

/// Schema matching the samples built by [`samples_from_records`] for this
/// batch: the mapped telemetry columns with at least one reading, in mapping
/// order. Columns that are absent or empty in every record are left out.
pub fn drive_schema_for(
    records: &[DriveDayRecord],
    mapping: &ColumnMapping,
) -> Result<SampleSchema> {
    let carried: HashSet<&str> = records
        .iter()
        .flat_map(|r| r.readings.iter())
        .filter(|(_, value)| value.is_some())
        .map(|(column, _)| column.as_str())
        .collect();
    schema_with(
        mapping
            .telemetry_entries()
            .filter(|e| carried.contains(e.column.as_str())),
    )
}

fn schema_with<'a>(entries: impl Iterator<Item = &'a ColumnMetric>) -> Result<SampleSchema> {
    let mut fields = vec![
        FieldSpec::scalar("serial_number", ScalarKind::Text),
        FieldSpec::scalar("date", ScalarKind::Date),
        FieldSpec::scalar("model", ScalarKind::Text),
    ];
    fields.extend(entries.map(|e| FieldSpec::series(e.column.clone(), e.metric.clone())));
    SampleSchema::new(DRIVE_SCHEMA_NAME, fields)
}

/// Parse JSON-lines drive-day records, skipping blank lines.
pub fn parse_records(jsonl: &str) -> Result<Vec<DriveDayRecord>> {
    jsonl
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(Error::from))
        .collect()
}
