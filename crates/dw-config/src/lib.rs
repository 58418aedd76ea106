//! Drivewatch configuration loading and validation.
//!
//! This crate provides:
//! - Typed pipeline configuration with validation
//! - Config resolution (CLI → env → XDG → defaults)
//! - Config snapshots for run reports
//! - The column-to-metric lookup table for drive telemetry
//! - Versioned, hash-verified model bundles

pub mod mapping;
pub mod model_bundle;
pub mod pipeline;
pub mod resolve;
pub mod snapshot;

pub use mapping::{is_telemetry_column, ColumnMapping, ColumnMetric};
pub use model_bundle::{FeatureWeight, ModelBundle, ModelBundleError, ModelParams};
pub use pipeline::{
    AlignmentMode, ConfigError, IndexStrategyKind, PipelineConfig, RefreshWindow,
    DEFAULT_OUTPUT_COLUMN,
};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource};
pub use snapshot::ConfigSnapshot;

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
