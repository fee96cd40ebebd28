//! Error types for configuration loading and validation.

use std::path::PathBuf;

/// Errors that can occur when loading or validating an `aire.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML content could not be parsed or has the wrong shape.
    #[error("invalid aire.toml: {0}")]
    Parse(String),

    /// A required field is absent or empty.
    #[error("missing required field `{0}`")]
    MissingField(String),

    /// A field holds a value outside its allowed range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Dotted name of the offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
