//! Config snapshots embedded in run reports.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::{ConfigError, PipelineConfig};
use crate::resolve::ConfigSource;

/// The effective config of a run, with its origin and content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub source: ConfigSource,
    /// SHA-256 of the compact JSON serialization of `config`.
    pub config_hash: String,
    pub resolved_at: String,
    pub config: PipelineConfig,
}

impl ConfigSnapshot {
    pub fn capture(config: &PipelineConfig, source: ConfigSource) -> Result<Self, ConfigError> {
        let json = serde_json::to_string(config)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(Self {
            source,
            config_hash: hex::encode(hasher.finalize()),
            resolved_at: chrono::Utc::now().to_rfc3339(),
            config: config.clone(),
        })
    }
}
