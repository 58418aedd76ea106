//! Device and run identity types.
//!
//! A device is identified by its drive serial number. Every pipeline run gets
//! a `RunId` so log lines and reports from concurrent runs can be told apart.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device identifier (drive serial number).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(serial: impl Into<String>) -> Self {
        DeviceId(serial.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(serial: &str) -> Self {
        DeviceId(serial.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(serial: String) -> Self {
        DeviceId(serial)
    }
}

/// Run ID for tracking pipeline runs.
///
/// Format: `run-<date>-<time>-<random>`
/// Example: `run-20160103-000000-abc123`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new run ID.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        let random: String = uuid::Uuid::new_v4()
            .to_string()
            .chars()
            .take(6)
            .collect();
        RunId(format!("run-{}-{}", now.format("%Y%m%d-%H%M%S"), random))
    }

    /// Parse an existing run ID string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with("run-") && s.len() > 19 {
            Some(RunId(s.to_string()))
        } else {
            None
        }
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let rid = RunId::new();
        assert!(rid.0.starts_with("run-"));
        assert!(RunId::parse(&rid.0).is_some());
    }

    #[test]
    fn test_run_id_rejects_foreign_prefix() {
        assert!(RunId::parse("sess-20160101-000000-abcdef").is_none());
    }

    #[test]
    fn test_device_id_serializes_as_plain_string() {
        let id = DeviceId::from("Z300");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"Z300\"");
        assert_eq!(id.to_string(), "Z300");
    }
}
