//! Drivewatch telemetry model and storage.
//!
//! This crate provides:
//! - Time series, telemetry samples and sample schemas
//! - Field classification (which schema fields are telemetry channels)
//! - Canonical transforms from raw drive-day records
//! - Arrow schema definitions and a batched Parquet writer

pub mod classify;
pub mod sample;
pub mod schema;
pub mod series;
pub mod transform;
pub mod writer;

pub use classify::{classify, FieldDescriptor};
pub use sample::{
    FieldSpec, RecordShape, RecordType, SampleSchema, ScalarKind, TelemetrySample, ValueType,
};
pub use schema::{features_schema, scores_schema, TableName};
pub use series::{Point, TimeSeries};
pub use transform::{
    drive_schema, drive_schema_for, parse_records, samples_from_records, to_measurement_series,
    to_measurements, DriveDayRecord, Measurement, MeasurementSeries, Treatment,
};
pub use writer::{write_features, BatchedWriter, ScoreRow, WriteError, WriterConfig};

/// Schema version for telemetry tables.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Default batch size for buffered writes.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
