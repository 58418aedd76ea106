//! Model-as-Data: versioned, hash-verified scoring model bundles.
//!
//! A `ModelBundle` wraps the parameters of a trained failure classifier with
//! metadata for versioning and integrity verification. Training happens
//! elsewhere; this crate only loads what training produced.
//!
//! # Integrity
//!
//! `model_hash` is the SHA-256 of the compact JSON serialization of `model`.
//! It is populated on creation and checked on every load. A bundle without
//! a hash is accepted (hand-written bundles), a bundle with a wrong hash is
//! not.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ── Bundle types ────────────────────────────────────────────────────────

/// Weight of one input metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub metric: String,
    pub weight: f64,
}

/// Parameters of a logistic failure classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub name: String,

    /// Output column carrying the failure probability.
    #[serde(default = "default_output_column")]
    pub output_column: String,

    pub intercept: f64,

    pub weights: Vec<FeatureWeight>,
}

fn default_output_column() -> String {
    crate::pipeline::DEFAULT_OUTPUT_COLUMN.to_string()
}

impl ModelParams {
    fn validate(&self) -> Result<(), ModelBundleError> {
        if self.output_column.trim().is_empty() {
            return Err(ModelBundleError::InvalidModel(
                "output_column must not be empty".into(),
            ));
        }
        if !self.intercept.is_finite() {
            return Err(ModelBundleError::InvalidModel(
                "intercept must be finite".into(),
            ));
        }
        let mut seen = HashSet::new();
        for w in &self.weights {
            if w.metric.is_empty() {
                return Err(ModelBundleError::InvalidModel(
                    "weight without metric name".into(),
                ));
            }
            if !w.weight.is_finite() {
                return Err(ModelBundleError::InvalidModel(format!(
                    "weight for {} is not finite",
                    w.metric
                )));
            }
            if !seen.insert(w.metric.as_str()) {
                return Err(ModelBundleError::InvalidModel(format!(
                    "metric {} weighted twice",
                    w.metric
                )));
            }
        }
        Ok(())
    }
}

/// A versioned model bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Bundle format version (for forward-compatible schema evolution).
    pub bundle_version: String,

    /// The embedded model parameters.
    pub model: ModelParams,

    /// SHA-256 hash of the JSON-serialized `model` field.
    #[serde(default)]
    pub model_hash: Option<String>,

    /// Human-readable description of what changed in this model version.
    #[serde(default)]
    pub changelog: Option<String>,

    /// ISO-8601 timestamp of bundle creation.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Errors that can occur during model bundle operations.
#[derive(Debug, thiserror::Error)]
pub enum ModelBundleError {
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("model hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("unsupported bundle version: {0}")]
    UnsupportedVersion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid model: {0}")]
    InvalidModel(String),
}

impl From<ModelBundleError> for dw_common::Error {
    fn from(err: ModelBundleError) -> Self {
        dw_common::Error::Config(err.to_string())
    }
}

// ── Bundle implementation ───────────────────────────────────────────────

impl ModelBundle {
    /// Supported bundle version.
    pub const CURRENT_VERSION: &'static str = "1.0.0";

    /// Create a new bundle wrapping model parameters, computing the hash.
    pub fn new(model: ModelParams) -> Result<Self, ModelBundleError> {
        model.validate()?;
        let hash = model_hash(&model)?;

        Ok(Self {
            bundle_version: Self::CURRENT_VERSION.to_string(),
            model,
            model_hash: Some(hash),
            changelog: None,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        })
    }

    /// Parse a bundle from JSON, verifying integrity.
    pub fn from_json(json: &str) -> Result<Self, ModelBundleError> {
        let bundle: ModelBundle = serde_json::from_str(json)?;
        bundle.verify_integrity()?;
        Ok(bundle)
    }

    /// Load from file with full error reporting.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, ModelBundleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Verify version, parameters and the integrity hash.
    pub fn verify_integrity(&self) -> Result<(), ModelBundleError> {
        if self.bundle_version != Self::CURRENT_VERSION {
            return Err(ModelBundleError::UnsupportedVersion(
                self.bundle_version.clone(),
            ));
        }

        self.model.validate()?;

        if let Some(expected_hash) = &self.model_hash {
            let actual_hash = model_hash(&self.model)?;
            if *expected_hash != actual_hash {
                return Err(ModelBundleError::HashMismatch {
                    expected: expected_hash.clone(),
                    actual: actual_hash,
                });
            }
        }

        Ok(())
    }

    /// Serialize the bundle to JSON.
    pub fn to_json(&self) -> Result<String, ModelBundleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn model_hash(model: &ModelParams) -> Result<String, ModelBundleError> {
    let json = serde_json::to_string(model)?;
    Ok(sha256_hex(json.as_bytes()))
}

/// Compute SHA-256 hex digest.
fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ── Tests ───────────────────────────────────────────────────────────────
