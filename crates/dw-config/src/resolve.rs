//! Config resolution: CLI → env → XDG → defaults.
//!
//! An explicitly named file (CLI flag or `DW_CONFIG`) must exist. The XDG
//! location is only consulted when a file is actually there.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::{ConfigError, PipelineConfig};

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "DW_CONFIG";

const CONFIG_DIR_NAME: &str = "drivewatch";
const CONFIG_FILE_NAME: &str = "config.json";

/// Where the effective config came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Xdg(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Cli(p) => write!(f, "cli:{}", p.display()),
            ConfigSource::Env(p) => write!(f, "env:{}", p.display()),
            ConfigSource::Xdg(p) => write!(f, "xdg:{}", p.display()),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

/// Candidate config locations in priority order.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub cli: Option<PathBuf>,
    pub env: Option<PathBuf>,
    pub xdg: Option<PathBuf>,
}

impl ConfigPaths {
    /// Collect candidates from the CLI flag, the environment and the user
    /// config directory.
    pub fn discover(cli: Option<PathBuf>) -> Self {
        Self {
            cli,
            env: std::env::var_os(CONFIG_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            xdg: dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)),
        }
    }
}

/// Resolve the effective pipeline config.
pub fn resolve_config(paths: &ConfigPaths) -> Result<(PipelineConfig, ConfigSource), ConfigError> {
    if let Some(path) = &paths.cli {
        return Ok((PipelineConfig::load(path)?, ConfigSource::Cli(path.clone())));
    }
    if let Some(path) = &paths.env {
        return Ok((PipelineConfig::load(path)?, ConfigSource::Env(path.clone())));
    }
    if let Some(path) = paths.xdg.as_ref().filter(|p| p.exists()) {
        return Ok((PipelineConfig::load(path)?, ConfigSource::Xdg(path.clone())));
    }
    Ok((PipelineConfig::default(), ConfigSource::Defaults))
}
