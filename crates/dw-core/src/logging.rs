//! Tracing subscriber setup for the dw-core binary.
//!
//! Logs go to stderr; stdout is reserved for command output. The filter is
//! taken from `DW_LOG`, then `RUST_LOG`, then the CLI verbosity (default
//! `info`).

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Project-specific filter variable.
pub const LOG_ENV_VAR: &str = "DW_LOG";

/// Verbosity from `-q` / `-v` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Trace,
}

impl Verbosity {
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (verbose, quiet) {
            (0, true) => Verbosity::Quiet,
            (0, false) => Verbosity::Normal,
            (1, _) => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }

    pub fn default_level(self) -> Level {
        match self {
            Verbosity::Quiet => Level::WARN,
            Verbosity::Normal => Level::INFO,
            Verbosity::Verbose => Level::DEBUG,
            Verbosity::Trace => Level::TRACE,
        }
    }
}

fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    // An unparseable DW_LOG falls through to RUST_LOG.
    if let Ok(filter) = std::env::var(LOG_ENV_VAR).map(EnvFilter::try_new) {
        if let Ok(filter) = filter {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(verbosity.default_level().as_str())
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(verbosity: Verbosity, json: bool) {
    let filter = build_env_filter(verbosity);
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
