//! Batched Parquet writer for exported tables.
//!
//! Score rows are buffered and flushed as one record batch every
//! `batch_size` rows. Output goes to a temp file in the target's directory
//! and is renamed over the target by [`BatchedWriter::finish`]; a writer
//! dropped early or failing partway leaves the target untouched.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use tempfile::TempPath;
use thiserror::Error;
use tracing::debug;

use crate::schema::{features_schema, scores_schema};
use crate::DEFAULT_BATCH_SIZE;

/// Errors from Parquet export.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("shape error: {0}")]
    Shape(String),
}

/// Writer settings.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Rows per record batch.
    pub batch_size: usize,
    pub compression: Compression,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            compression: Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

impl WriterConfig {
    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression)
            .build()
    }
}

/// One row of the `scores` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub score: f64,
}

fn timestamp_array(timestamps: impl Iterator<Item = DateTime<Utc>>) -> TimestampMicrosecondArray {
    TimestampMicrosecondArray::from(timestamps.map(|t| t.timestamp_micros()).collect::<Vec<_>>())
        .with_timezone("UTC")
}

/// A temp file next to `target`, renamed over it on commit.
struct Staged {
    target: PathBuf,
    temp: TempPath,
}

impl Staged {
    fn create(target: &Path) -> Result<(File, Self), WriteError> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let (file, temp) = tempfile::NamedTempFile::new_in(dir)
            .map_err(|source| WriteError::Io {
                path: target.to_path_buf(),
                source,
            })?
            .into_parts();
        let staged = Self {
            target: target.to_path_buf(),
            temp,
        };
        Ok((file, staged))
    }

    fn commit(self) -> Result<(), WriteError> {
        let Self { target, temp } = self;
        temp.persist(&target).map_err(|e| WriteError::Io {
            path: target.clone(),
            source: e.error,
        })
    }
}

/// Buffered writer for the `scores` table.
pub struct BatchedWriter {
    writer: ArrowWriter<File>,
    staged: Staged,
    schema: SchemaRef,
    buffer: Vec<ScoreRow>,
    batch_size: usize,
    rows_written: usize,
}

impl BatchedWriter {
    pub fn create(path: &Path, config: WriterConfig) -> Result<Self, WriteError> {
        let schema = scores_schema();
        let (file, staged) = Staged::create(path)?;
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(config.properties()))?;
        Ok(Self {
            writer,
            staged,
            schema,
            buffer: Vec::with_capacity(config.batch_size),
            batch_size: config.batch_size.max(1),
            rows_written: 0,
        })
    }

    /// Buffer a row, flushing when the batch is full.
    pub fn push(&mut self, row: ScoreRow) -> Result<(), WriteError> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write buffered rows as one record batch.
    pub fn flush(&mut self) -> Result<(), WriteError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.buffer);
        let device: StringArray = rows.iter().map(|r| Some(r.device_id.as_str())).collect();
        let timestamp = timestamp_array(rows.iter().map(|r| r.timestamp));
        let score = Float64Array::from(rows.iter().map(|r| r.score).collect::<Vec<_>>());
        let columns: Vec<ArrayRef> = vec![Arc::new(device), Arc::new(timestamp), Arc::new(score)];
        let batch = RecordBatch::try_new(self.schema.clone(), columns)?;
        self.writer.write(&batch)?;
        self.rows_written += rows.len();
        debug!(rows = rows.len(), total = self.rows_written, "flushed score batch");
        Ok(())
    }

    /// Flush, close and move the file into place. Returns the number of
    /// rows written.
    pub fn finish(mut self) -> Result<usize, WriteError> {
        self.flush()?;
        self.writer.close()?;
        self.staged.commit()?;
        Ok(self.rows_written)
    }
}

/// Write one dataset as a `features` table.
///
/// `columns[i]` holds the values of `names[i]`; every column must have one
/// value per index entry.
pub fn write_features(
    path: &Path,
    names: &[String],
    index: &[DateTime<Utc>],
    columns: &[Vec<f64>],
    config: &WriterConfig,
) -> Result<usize, WriteError> {
    if names.len() != columns.len() {
        return Err(WriteError::Shape(format!(
            "{} column names for {} columns",
            names.len(),
            columns.len()
        )));
    }
    if let Some((name, col)) = names.iter().zip(columns).find(|(_, c)| c.len() != index.len()) {
        return Err(WriteError::Shape(format!(
            "column {name} has {} values, index has {}",
            col.len(),
            index.len()
        )));
    }

    let schema = features_schema(names);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);
    arrays.push(Arc::new(timestamp_array(index.iter().copied())));
    arrays.extend(
        columns
            .iter()
            .map(|c| Arc::new(Float64Array::from(c.clone())) as ArrayRef),
    );
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let (file, staged) = Staged::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(config.properties()))?;
    writer.write(&batch)?;
    writer.close()?;
    staged.commit()?;
    debug!(path = %path.display(), rows = index.len(), "wrote features table");
    Ok(index.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use chrono::TimeZone;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, day, 0, 0, 0).unwrap()
    }

    fn read_batches(path: &Path) -> Vec<RecordBatch> {
        let file = File::open(path).unwrap();
        ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap()
            .map(|b| b.unwrap())
            .collect()
    }

    #[test]
    fn scores_flush_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.parquet");
        let config = WriterConfig {
            batch_size: 2,
            ..WriterConfig::default()
        };
        let mut writer = BatchedWriter::create(&path, config).unwrap();
        for (day, score) in [(1, 0.1), (2, 0.2), (3, 0.9)] {
            writer
                .push(ScoreRow {
                    device_id: "Z300".into(),
                    timestamp: ts(day),
                    score,
                })
                .unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let batches = read_batches(&path);
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 3);
        let scores = batches[0]
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(scores.value(0), 0.1);
    }

    #[test]
    fn empty_writer_produces_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let writer = BatchedWriter::create(&path, WriterConfig::default()).unwrap();
        assert_eq!(writer.finish().unwrap(), 0);
        assert!(read_batches(&path).iter().all(|b| b.num_rows() == 0));
    }

    #[test]
    fn features_roundtrip_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.parquet");
        let names = vec!["Smart5Raw".to_string(), "Smart187Raw".to_string()];
        let rows = write_features(
            &path,
            &names,
            &[ts(1), ts(2)],
            &[vec![1.0, 2.0], vec![0.0, 5.0]],
            &WriterConfig::default(),
        )
        .unwrap();
        assert_eq!(rows, 2);
        let batches = read_batches(&path);
        assert_eq!(batches[0].num_columns(), 3);
        let col = batches[0].column(2);
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn features_reject_ragged_columns() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_features(
            &dir.path().join("bad.parquet"),
            &["A".to_string()],
            &[ts(1), ts(2)],
            &[vec![1.0]],
            &WriterConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, WriteError::Shape(_)));
    }

    #[test]
    fn abandoned_writer_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.parquet");
        std::fs::write(&path, b"previous export").unwrap();

        let mut writer = BatchedWriter::create(&path, WriterConfig::default()).unwrap();
        writer
            .push(ScoreRow {
                device_id: "Z300".into(),
                timestamp: ts(1),
                score: 0.1,
            })
            .unwrap();
        writer.flush().unwrap();
        drop(writer);

        assert_eq!(std::fs::read(&path).unwrap(), b"previous export");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
