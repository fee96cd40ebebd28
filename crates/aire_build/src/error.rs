//! Structural build errors.

use std::path::PathBuf;

use aire_cache::CacheError;
use aire_config::ConfigError;
use aire_graph::GraphError;
use aire_remote::RemoteError;

/// Errors that stop a build before or outside per-unit work.
///
/// Per-unit failures (compile errors, cache misses, remote outages) never
/// surface here; they are recorded in the [`BuildReport`](crate::BuildReport).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The unit set does not form a valid dependency graph.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The local cache could not be opened.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The remote cache is misconfigured.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The build configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The build report could not be written.
    #[error("failed to write build report {path}: {source}")]
    Report {
        /// Destination of the report.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A build task panicked or was aborted.
    #[error("build task failed: {0}")]
    Task(String),
}
