//! Drivewatch common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the drivewatch crates:
//! - Device and run identity types
//! - Schema versioning
//! - The unified pipeline error type
//! - Output format specifications

pub mod error;
pub mod id;
pub mod output;
pub mod schema;

pub use error::{Error, Result};
pub use id::{DeviceId, RunId};
pub use output::OutputFormat;
pub use schema::SCHEMA_VERSION;
