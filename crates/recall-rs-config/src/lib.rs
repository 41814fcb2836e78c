//! Store configuration and location resolution.
//!
//! This crate owns the `memory_config.json` descriptor that locks a store to
//! one embedding provider, model and dimension, the race-free first-use
//! creation of that descriptor, and the rules for locating a store on disk.

mod error;
mod loader;
mod location;
mod model;

/// Public error type returned by config loading and validation APIs.
pub use error::ConfigError;
/// Result of a load-or-create call.
pub use loader::LoadedConfig;
/// Store location resolution.
pub use location::{LocationSource, StoreLocation};
/// Configuration schema models.
pub use model::*;
