//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::{BuildConfig, RemoteKind};
use std::path::Path;

/// Name of the configuration file within a project directory.
pub const CONFIG_FILE: &str = "aire.toml";

/// Loads and validates an `aire.toml` configuration from a project directory.
///
/// Reads `<project_dir>/aire.toml`, parses it, and validates required fields.
pub fn load_config(project_dir: &Path) -> Result<BuildConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    load_config_from_str(&content)
}

/// Parses and validates an `aire.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<BuildConfig, ConfigError> {
    let config: BuildConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and configuration values are consistent.
fn validate_config(config: &BuildConfig) -> Result<(), ConfigError> {
    if config.target_runtime_version.trim().is_empty() {
        return Err(ConfigError::MissingField(
            "target_runtime_version".to_string(),
        ));
    }
    if config.compiler_version.trim().is_empty() {
        return Err(ConfigError::MissingField("compiler_version".to_string()));
    }
    if config.worker_count == Some(0) {
        return Err(ConfigError::invalid("worker_count", "must be at least 1"));
    }
    if config.cache_capacity_bytes == Some(0) {
        return Err(ConfigError::invalid(
            "cache_capacity_bytes",
            "must be greater than 0",
        ));
    }

    let remote = &config.remote_backend;
    let has_endpoint = remote.endpoint.as_deref().is_some_and(|e| !e.is_empty());
    let has_bucket = remote.bucket.as_deref().is_some_and(|b| !b.is_empty());
    match remote.kind {
        RemoteKind::Http | RemoteKind::S3 if !has_endpoint => {
            return Err(ConfigError::MissingField(format!(
                "remote_backend.endpoint (required for kind = \"{}\")",
                remote.kind
            )));
        }
        _ => {}
    }
    if matches!(remote.kind, RemoteKind::S3 | RemoteKind::Gcs) && !has_bucket {
        return Err(ConfigError::MissingField(format!(
            "remote_backend.bucket (required for kind = \"{}\")",
            remote.kind
        )));
    }
    if remote.kind != RemoteKind::None && remote.timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "remote_backend.timeout_ms",
            "must be greater than 0",
        ));
    }
    Ok(())
}
