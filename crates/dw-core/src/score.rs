//! Scoring: model invocation and score extraction.
//!
//! The model is opaque: anything implementing [`ScoringModel`] maps a feature
//! dataset to an output dataset with the same rows. [`score`] calls it once
//! per run and pulls a single output column out as the score series.

use std::fmt;

use chrono::{DateTime, Utc};
use dw_common::{Error, Result};
use dw_config::{FeatureWeight, ModelBundle, ModelParams, DEFAULT_OUTPUT_COLUMN};
use dw_telemetry::Point;
use tracing::debug;

use crate::dataset::Dataset;

/// Name of the complement column emitted by [`LogisticModel`].
pub const COMPLEMENT_COLUMN: &str = "0.0";

/// A trained model, seen only through its prediction.
pub trait ScoringModel: Send + Sync {
    fn name(&self) -> &str;

    /// Predict one output row per input row.
    fn predict(&self, dataset: &Dataset) -> Result<Dataset>;
}

/// Which model output column becomes the score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputColumn {
    Name(String),
    Position(usize),
}

impl Default for OutputColumn {
    fn default() -> Self {
        OutputColumn::Name(DEFAULT_OUTPUT_COLUMN.to_string())
    }
}

impl fmt::Display for OutputColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputColumn::Name(name) => write!(f, "'{name}'"),
            OutputColumn::Position(i) => write!(f, "#{i}"),
        }
    }
}

impl OutputColumn {
    fn select<'a>(&self, dataset: &'a Dataset) -> Option<&'a [f64]> {
        match self {
            OutputColumn::Name(name) => dataset.column(name),
            OutputColumn::Position(i) => dataset.column_at(*i),
        }
    }
}

/// One score per dataset row, in row order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreSeries {
    points: Vec<Point>,
}

impl ScoreSeries {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    /// Earliest and latest timestamp.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.points.iter().map(|p| p.timestamp).min()?;
        let last = self.points.iter().map(|p| p.timestamp).max()?;
        Some((first, last))
    }
}

/// Run `model` over `dataset` and extract `column` as scores.
///
/// An empty dataset is `IndexEmpty` and the model is not called. The model
/// output must keep the input's rows and index, contain the requested column
/// and hold only finite scores; anything else is `ModelOutput`.
pub fn score(
    dataset: &Dataset,
    model: &dyn ScoringModel,
    column: &OutputColumn,
) -> Result<ScoreSeries> {
    if dataset.is_empty() {
        return Err(Error::IndexEmpty);
    }

    let output = model.predict(dataset)?;
    if output.rows() != dataset.rows() {
        return Err(Error::ModelOutput(format!(
            "model {} returned {} rows for {} input rows",
            model.name(),
            output.rows(),
            dataset.rows()
        )));
    }
    if output.index() != dataset.index() {
        return Err(Error::ModelOutput(format!(
            "model {} changed the row index",
            model.name()
        )));
    }
    let values = column.select(&output).ok_or_else(|| {
        Error::ModelOutput(format!(
            "model {} output has no column {column} (columns: {})",
            model.name(),
            output.columns().join(", ")
        ))
    })?;
    if let Some(row) = values.iter().position(|v| !v.is_finite()) {
        return Err(Error::ModelOutput(format!(
            "model {} produced a non-finite score at row {row}",
            model.name()
        )));
    }

    let points = dataset
        .index()
        .iter()
        .zip(values)
        .map(|(ts, v)| Point::new(*ts, *v))
        .collect::<Vec<_>>();
    debug!(model = model.name(), rows = points.len(), %column, "extracted scores");
    Ok(ScoreSeries::new(points))
}

/// Logistic failure classifier over named feature columns.
#[derive(Debug, Clone)]
pub struct LogisticModel {
    name: String,
    intercept: f64,
    weights: Vec<FeatureWeight>,
    output_column: String,
}

impl LogisticModel {
    pub fn from_params(params: &ModelParams) -> Self {
        Self {
            name: params.name.clone(),
            intercept: params.intercept,
            weights: params.weights.clone(),
            output_column: params.output_column.clone(),
        }
    }

    pub fn from_bundle(bundle: &ModelBundle) -> Self {
        Self::from_params(&bundle.model)
    }

    /// Column the failure probability is written to.
    pub fn output_column(&self) -> &str {
        &self.output_column
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl ScoringModel for LogisticModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, dataset: &Dataset) -> Result<Dataset> {
        let inputs = self
            .weights
            .iter()
            .map(|w| {
                dataset
                    .column(&w.metric)
                    .map(|values| (w.weight, values))
                    .ok_or_else(|| {
                        Error::Model(format!(
                            "{}: input column '{}' missing from dataset",
                            self.name, w.metric
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let failure: Vec<f64> = (0..dataset.rows())
            .map(|row| {
                let z = inputs
                    .iter()
                    .fold(self.intercept, |acc, (w, values)| acc + w * values[row]);
                sigmoid(z)
            })
            .collect();

        let index = dataset.index().to_vec();
        if self.output_column == COMPLEMENT_COLUMN {
            return Dataset::new(vec![self.output_column.clone()], vec![failure], index);
        }
        let healthy = failure.iter().map(|p| 1.0 - p).collect();
        Dataset::new(
            vec![COMPLEMENT_COLUMN.to_string(), self.output_column.clone()],
            vec![healthy, failure],
            index,
        )
    }
}
