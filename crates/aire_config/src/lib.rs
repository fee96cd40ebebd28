//! Parsing and validation of `aire.toml` build configuration files.
//!
//! This crate reads the configuration consumed by the build/cache core and
//! produces a strongly-typed [`BuildConfig`], which [`resolve_config`] turns
//! into concrete paths, a worker count, and an environment fingerprint.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use resolve::{resolve_config, ResolvedConfig};
pub use types::*;
