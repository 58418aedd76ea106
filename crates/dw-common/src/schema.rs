//! Schema versioning and compatibility.

/// Current schema version for persisted JSON documents (score stores,
/// configs, run reports).
///
/// Follows semver: MAJOR.MINOR.PATCH. Only a MAJOR bump breaks readers.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Oldest store version this build still reads.
pub const MIN_COMPATIBLE_VERSION: &str = "1.0.0";

fn major_of(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

/// Check if a persisted document version can be read by this build.
///
/// Unparseable versions are never compatible.
pub fn is_compatible(version: &str) -> bool {
    match (major_of(SCHEMA_VERSION), major_of(version)) {
        (Some(current), Some(other)) => current == other,
        _ => false,
    }
}
