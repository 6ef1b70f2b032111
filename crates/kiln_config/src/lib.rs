//! Parsing and validation of `kiln.toml` cache configuration files.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`KilnConfig`] holding cache capacities, the default dependency-check
//! policy, intermediate store settings and the compile execution mode.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
