//! Dense feature datasets.
//!
//! The assembler turns a batch of samples into a column-major `f64` matrix:
//! one column per classified field (named by its metric, in descriptor
//! order), one row per canonical index entry. The same type carries model
//! output, so a model sees and returns the same shape of thing.

use chrono::{DateTime, Utc};
use dw_common::{Error, Result};
use dw_config::AlignmentMode;
use dw_telemetry::{FieldDescriptor, TelemetrySample};
use tracing::{debug, warn};

use crate::index::CanonicalIndex;

/// Column-major numeric matrix with timestamp row labels.
///
/// Every column has exactly `index.len()` values; construction rejects
/// anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    data: Vec<Vec<f64>>,
    index: Vec<DateTime<Utc>>,
}

impl Dataset {
    pub fn new(
        columns: Vec<String>,
        data: Vec<Vec<f64>>,
        index: Vec<DateTime<Utc>>,
    ) -> Result<Self> {
        if columns.len() != data.len() {
            return Err(Error::Schema(format!(
                "{} column names for {} columns",
                columns.len(),
                data.len()
            )));
        }
        let ragged = columns.iter().zip(&data).find(|(_, v)| v.len() != index.len());
        if let Some((name, values)) = ragged {
            return Err(Error::Alignment {
                field: name.clone(),
                sample: None,
                expected: index.len(),
                actual: values.len(),
            });
        }
        Ok(Self { columns, data, index })
    }

    /// A dataset with no rows and the given columns.
    pub fn empty(columns: Vec<String>) -> Self {
        let data = vec![Vec::new(); columns.len()];
        Self {
            columns,
            data,
            index: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of the first column called `name`.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_position(name).map(|i| self.data[i].as_slice())
    }

    pub fn column_at(&self, position: usize) -> Option<&[f64]> {
        self.data.get(position).map(Vec::as_slice)
    }

    /// All columns, in column order.
    pub fn data(&self) -> &[Vec<f64>] {
        &self.data
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    /// Row labels as RFC 3339 strings.
    pub fn row_labels(&self) -> Vec<String> {
        self.index.iter().map(DateTime::to_rfc3339).collect()
    }
}

/// Build the feature matrix for `samples` along `index`.
///
/// Each column is the concatenation, in sample order, of that field's
/// values. In strict mode every sample must supply exactly as many values as
/// its index segment; lenient mode only logs per-sample mismatches but still
/// requires the finished column to match the index. Values are never
/// padded or zero filled.
pub fn assemble(
    samples: &[TelemetrySample],
    fields: &[FieldDescriptor],
    index: &CanonicalIndex,
    mode: AlignmentMode,
) -> Result<Dataset> {
    if index.sample_count() != samples.len() {
        return Err(Error::Schema(format!(
            "index resolved over {} samples, batch has {}",
            index.sample_count(),
            samples.len()
        )));
    }

    let mut data = Vec::with_capacity(fields.len());
    for field in fields {
        let mut values = Vec::with_capacity(index.len());
        for (position, sample) in samples.iter().enumerate() {
            let series = sample.series(&field.name);
            let expected = index.segment_len(position);
            let actual = series.map_or(0, |s| s.len());
            if actual != expected {
                match mode {
                    AlignmentMode::Strict => {
                        return Err(Error::Alignment {
                            field: field.name.clone(),
                            sample: Some(position),
                            expected,
                            actual,
                        })
                    }
                    AlignmentMode::Lenient => warn!(
                        field = %field.name,
                        sample = position,
                        expected,
                        actual,
                        "field length differs from index segment"
                    ),
                }
            }
            if let Some(series) = series {
                values.extend(series.values());
            }
        }

        if values.len() != index.len() {
            return Err(Error::Alignment {
                field: field.name.clone(),
                sample: None,
                expected: index.len(),
                actual: values.len(),
            });
        }
        data.push(values);
    }

    let columns = fields.iter().map(|f| f.metric.clone()).collect();
    let dataset = Dataset::new(columns, data, index.timestamps().to_vec())?;
    debug!(
        rows = dataset.rows(),
        columns = dataset.columns().len(),
        "assembled dataset"
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FirstNonEmpty, IndexStrategy};
    use chrono::TimeZone;
    use dw_telemetry::{Point, TimeSeries};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, day, 0, 0, 0).unwrap()
    }

    fn series(field: &str, points: &[(u32, f64)]) -> TimeSeries {
        TimeSeries::new(
            field,
            points.iter().map(|(d, v)| Point::new(ts(*d), *v)).collect(),
        )
        .unwrap()
    }

    fn fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor {
                name: "smart_5".into(),
                metric: "Smart5Raw".into(),
                position: 1,
            },
            FieldDescriptor {
                name: "smart_187".into(),
                metric: "Smart187Raw".into(),
                position: 2,
            },
        ]
    }

    fn build(samples: &[TelemetrySample], mode: AlignmentMode) -> Result<Dataset> {
        let f = fields();
        let resolved = FirstNonEmpty.resolve(samples, &f);
        assemble(samples, &f, &resolved.index, mode)
    }

    #[test]
    fn columns_follow_descriptor_order_across_samples() {
        let samples = vec![
            TelemetrySample::new("Z300")
                .with_series("smart_5", series("smart_5", &[(1, 0.0)]))
                .with_series("smart_187", series("smart_187", &[(1, 3.0)])),
            TelemetrySample::new("Z300")
                .with_series("smart_5", series("smart_5", &[(2, 8.0)]))
                .with_series("smart_187", series("smart_187", &[(2, 4.0)])),
        ];
        let ds = build(&samples, AlignmentMode::Strict).unwrap();
        assert_eq!(ds.columns(), &["Smart5Raw".to_string(), "Smart187Raw".to_string()]);
        assert_eq!(ds.column("Smart5Raw"), Some(&[0.0, 8.0][..]));
        assert_eq!(ds.column_at(1), Some(&[3.0, 4.0][..]));
        assert_eq!(ds.rows(), 2);
        assert_eq!(ds.row_labels()[1], "2016-01-02T00:00:00+00:00");
    }

    #[test]
    fn strict_rejects_null_where_rows_expected() {
        let samples = vec![TelemetrySample::new("Z300")
            .with_series("smart_5", series("smart_5", &[(1, 0.0)]))
            .with_null("smart_187")];
        let err = build(&samples, AlignmentMode::Strict).unwrap_err();
        assert!(matches!(
            err,
            Error::Alignment {
                ref field,
                sample: Some(0),
                expected: 1,
                actual: 0,
            } if field == "smart_187"
        ));
    }

    #[test]
    fn lenient_still_requires_full_columns() {
        let samples = vec![TelemetrySample::new("Z300")
            .with_series("smart_5", series("smart_5", &[(1, 0.0)]))
            .with_null("smart_187")];
        let err = build(&samples, AlignmentMode::Lenient).unwrap_err();
        assert!(matches!(err, Error::Alignment { sample: None, .. }));
    }

    #[test]
    fn lenient_accepts_offsetting_mismatches() {
        // smart_187 is short in the first window and long in the second; the
        // totals agree so lenient mode accepts the column.
        let samples = vec![
            TelemetrySample::new("Z300")
                .with_series("smart_5", series("smart_5", &[(1, 1.0)]))
                .with_series("smart_187", series("smart_187", &[])),
            TelemetrySample::new("Z300")
                .with_series("smart_5", series("smart_5", &[(2, 2.0)]))
                .with_series("smart_187", series("smart_187", &[(2, 5.0), (3, 6.0)])),
        ];
        assert!(build(&samples, AlignmentMode::Strict).is_err());
        let ds = build(&samples, AlignmentMode::Lenient).unwrap();
        assert_eq!(ds.column("Smart187Raw"), Some(&[5.0, 6.0][..]));
    }

    #[test]
    fn every_column_matches_index_length() {
        let samples: Vec<_> = (1..=5)
            .map(|d| {
                TelemetrySample::new("Z300")
                    .with_series("smart_5", series("smart_5", &[(d, 1.0)]))
                    .with_series("smart_187", series("smart_187", &[(d, 2.0)]))
            })
            .collect();
        let ds = build(&samples, AlignmentMode::Strict).unwrap();
        assert!(ds.data().iter().all(|c| c.len() == ds.rows()));
        assert_eq!(ds.rows(), 5);
    }

    #[test]
    fn new_rejects_ragged_columns() {
        let err = Dataset::new(vec!["a".into()], vec![vec![1.0, 2.0]], vec![ts(1)]).unwrap_err();
        assert!(matches!(err, Error::Alignment { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn index_sample_count_must_match_batch() {
        let samples = vec![TelemetrySample::new("Z300")];
        let err = assemble(&samples, &fields(), &CanonicalIndex::empty(2), AlignmentMode::Strict)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
