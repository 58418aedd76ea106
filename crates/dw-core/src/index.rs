//! Canonical time index resolution.
//!
//! Every batch gets one shared time axis before assembly. How that axis is
//! chosen is a strategy ([`IndexStrategy`]); the assembler only sees the
//! result, a [`CanonicalIndex`] made of one segment per sample.
//!
//! # First non-empty wins
//!
//! The default strategy scans samples in order and, inside each sample,
//! fields in descriptor order. The first non-empty series found becomes the
//! *anchor*: its timestamps are the first segment, taken verbatim, and every
//! later sample contributes the anchor field's own timestamps. There is no
//! union, intersection or interpolation across fields; all classified fields
//! of one window are expected to share one clock.
//!
//! ```text
//! sample 0:  A=[]          B=null      → segment []          (nothing yet)
//! sample 1:  A=[t1,t2]     B=null      → segment [t1,t2]     (anchor = A)
//! sample 2:  A=null        B=[t3]      → segment []          (no A here)
//! ```

use std::collections::BTreeSet;
use std::ops::Range;

use chrono::{DateTime, Utc};
use dw_config::IndexStrategyKind;
use dw_telemetry::{FieldDescriptor, TelemetrySample};
use serde::{Deserialize, Serialize};

/// Which sample/field pair fixed the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCursor {
    pub sample: usize,
    /// Position in the descriptor list, not in the schema.
    pub field: usize,
}

/// Concatenated per-sample timestamps of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalIndex {
    timestamps: Vec<DateTime<Utc>>,
    segments: Vec<Range<usize>>,
}

impl CanonicalIndex {
    /// An index with no rows covering `samples` samples.
    pub fn empty(samples: usize) -> Self {
        Self {
            timestamps: Vec::new(),
            segments: vec![0..0; samples],
        }
    }

    /// Concatenate per-sample segments in sample order.
    pub fn from_segments(segments: Vec<Vec<DateTime<Utc>>>) -> Self {
        let mut timestamps = Vec::with_capacity(segments.iter().map(Vec::len).sum());
        let mut ranges = Vec::with_capacity(segments.len());
        for segment in segments {
            let start = timestamps.len();
            timestamps.extend(segment);
            ranges.push(start..timestamps.len());
        }
        Self {
            timestamps,
            segments: ranges,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Number of samples the index was resolved over.
    pub fn sample_count(&self) -> usize {
        self.segments.len()
    }

    /// Row range owned by `sample`; empty for samples outside the batch.
    pub fn segment(&self, sample: usize) -> Range<usize> {
        self.segments.get(sample).cloned().unwrap_or(0..0)
    }

    pub fn segment_len(&self, sample: usize) -> usize {
        self.segment(sample).len()
    }

    /// Serialized row labels (RFC 3339).
    pub fn labels(&self) -> Vec<String> {
        self.timestamps.iter().map(DateTime::to_rfc3339).collect()
    }

    pub fn into_timestamps(self) -> Vec<DateTime<Utc>> {
        self.timestamps
    }
}

/// Output of a strategy: the index plus the pair that fixed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIndex {
    pub index: CanonicalIndex,
    /// `None` when no sample had data for any classified field.
    pub cursor: Option<IndexCursor>,
}

/// Policy that picks the shared time axis of a batch.
pub trait IndexStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolve the index. Never fails: a batch without data yields an empty
    /// index.
    fn resolve(&self, samples: &[TelemetrySample], fields: &[FieldDescriptor]) -> ResolvedIndex;
}

/// Strategy for a configured kind.
pub fn strategy_for(kind: IndexStrategyKind) -> Box<dyn IndexStrategy> {
    match kind {
        IndexStrategyKind::FirstNonEmpty => Box::new(FirstNonEmpty),
        IndexStrategyKind::UnionOfFields => Box::new(UnionOfFields),
    }
}

fn first_non_empty(samples: &[TelemetrySample], fields: &[FieldDescriptor]) -> Option<IndexCursor> {
    samples.iter().enumerate().find_map(|(s, sample)| {
        fields
            .iter()
            .position(|f| sample.series(&f.name).is_some_and(|ts| !ts.is_empty()))
            .map(|field| IndexCursor { sample: s, field })
    })
}

/// Adopt the clock of the first non-empty field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstNonEmpty;

impl IndexStrategy for FirstNonEmpty {
    fn name(&self) -> &'static str {
        "first_non_empty"
    }

    fn resolve(&self, samples: &[TelemetrySample], fields: &[FieldDescriptor]) -> ResolvedIndex {
        let Some(cursor) = first_non_empty(samples, fields) else {
            return ResolvedIndex {
                index: CanonicalIndex::empty(samples.len()),
                cursor: None,
            };
        };

        let anchor = &fields[cursor.field].name;
        let segments = samples
            .iter()
            .map(|sample| {
                sample
                    .series(anchor)
                    .map(|ts| ts.timestamps().collect())
                    .unwrap_or_default()
            })
            .collect();

        ResolvedIndex {
            index: CanonicalIndex::from_segments(segments),
            cursor: Some(cursor),
        }
    }
}

/// Per sample, the sorted union of every classified field's timestamps.
///
/// Stricter than [`FirstNonEmpty`] when fields disagree: any field missing a
/// timestamp another field has will fail strict alignment instead of being
/// silently paired with the wrong row.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnionOfFields;

impl IndexStrategy for UnionOfFields {
    fn name(&self) -> &'static str {
        "union_of_fields"
    }

    fn resolve(&self, samples: &[TelemetrySample], fields: &[FieldDescriptor]) -> ResolvedIndex {
        let cursor = first_non_empty(samples, fields);
        if cursor.is_none() {
            return ResolvedIndex {
                index: CanonicalIndex::empty(samples.len()),
                cursor,
            };
        }

        let segments = samples
            .iter()
            .map(|sample| {
                let union: BTreeSet<DateTime<Utc>> = fields
                    .iter()
                    .filter_map(|f| sample.series(&f.name))
                    .flat_map(|ts| ts.timestamps())
                    .collect();
                union.into_iter().collect()
            })
            .collect();

        ResolvedIndex {
            index: CanonicalIndex::from_segments(segments),
            cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dw_telemetry::{Point, TimeSeries};

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 1, day, 0, 0, 0).unwrap()
    }

    fn series(field: &str, days: &[u32]) -> TimeSeries {
        TimeSeries::new(
            field,
            days.iter().map(|d| Point::new(ts(*d), f64::from(*d))).collect(),
        )
        .unwrap()
    }

    fn fields(names: &[&str]) -> Vec<FieldDescriptor> {
        names
            .iter()
            .enumerate()
            .map(|(position, name)| FieldDescriptor {
                name: name.to_string(),
                metric: name.to_uppercase(),
                position,
            })
            .collect()
    }

    fn adoption_batch() -> Vec<TelemetrySample> {
        vec![
            TelemetrySample::new("D1").with_series("A", series("A", &[])),
            TelemetrySample::new("D1").with_series("A", series("A", &[1, 2])),
            TelemetrySample::new("D1").with_series("B", series("B", &[3])),
        ]
    }

    #[test]
    fn first_non_empty_adopts_first_hit() {
        let resolved = FirstNonEmpty.resolve(&adoption_batch(), &fields(&["A", "B"]));
        assert_eq!(resolved.index.timestamps(), &[ts(1), ts(2)]);
        assert_eq!(resolved.cursor, Some(IndexCursor { sample: 1, field: 0 }));
        assert_eq!(resolved.index.segment(0), 0..0);
        assert_eq!(resolved.index.segment(1), 0..2);
        assert_eq!(resolved.index.segment(2), 2..2);
    }

    #[test]
    fn descriptor_order_breaks_ties_within_sample() {
        let batch = vec![TelemetrySample::new("D1")
            .with_series("A", series("A", &[1]))
            .with_series("B", series("B", &[2]))];
        let resolved = FirstNonEmpty.resolve(&batch, &fields(&["B", "A"]));
        assert_eq!(resolved.index.timestamps(), &[ts(2)]);
        assert_eq!(resolved.cursor, Some(IndexCursor { sample: 0, field: 0 }));
    }

    #[test]
    fn anchor_field_extends_across_windows() {
        let batch: Vec<_> = (1..=3)
            .map(|d| {
                TelemetrySample::new("Z300")
                    .with_series("smart_5", series("smart_5", &[d]))
                    .with_series("smart_187", series("smart_187", &[d]))
            })
            .collect();
        let resolved = FirstNonEmpty.resolve(&batch, &fields(&["smart_5", "smart_187"]));
        assert_eq!(resolved.index.timestamps(), &[ts(1), ts(2), ts(3)]);
        assert_eq!(resolved.index.sample_count(), 3);
    }

    #[test]
    fn no_data_yields_empty_index() {
        let batch = vec![
            TelemetrySample::new("D1").with_null("A"),
            TelemetrySample::new("D1").with_series("B", series("B", &[])),
        ];
        let resolved = FirstNonEmpty.resolve(&batch, &fields(&["A", "B"]));
        assert!(resolved.index.is_empty());
        assert_eq!(resolved.index.sample_count(), 2);
        assert!(resolved.cursor.is_none());
    }

    #[test]
    fn resolution_is_deterministic() {
        let batch = adoption_batch();
        let f = fields(&["A", "B"]);
        assert_eq!(FirstNonEmpty.resolve(&batch, &f), FirstNonEmpty.resolve(&batch, &f));
    }

    #[test]
    fn union_merges_field_clocks() {
        let batch = vec![TelemetrySample::new("D1")
            .with_series("A", series("A", &[1, 3]))
            .with_series("B", series("B", &[2, 3]))];
        let resolved = UnionOfFields.resolve(&batch, &fields(&["A", "B"]));
        assert_eq!(resolved.index.timestamps(), &[ts(1), ts(2), ts(3)]);
    }

    #[test]
    fn labels_are_rfc3339() {
        let index = CanonicalIndex::from_segments(vec![vec![ts(1)]]);
        assert_eq!(index.labels(), vec!["2016-01-01T00:00:00+00:00".to_string()]);
    }

    #[test]
    fn strategy_for_kind() {
        assert_eq!(strategy_for(IndexStrategyKind::FirstNonEmpty).name(), "first_non_empty");
        assert_eq!(strategy_for(IndexStrategyKind::UnionOfFields).name(), "union_of_fields");
    }
}
