//! Resolution of a parsed configuration into concrete build settings.

use crate::types::{BuildConfig, RemoteConfig};
use aire_common::EnvFingerprint;
use std::path::{Path, PathBuf};

/// Worker count used when the machine's parallelism cannot be queried.
const FALLBACK_WORKERS: usize = 4;

/// A build configuration with every default applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute (or project-relative when the project path is relative)
    /// local cache directory.
    pub cache_directory: PathBuf,
    /// Number of parallel build workers, always at least 1.
    pub worker_count: usize,
    /// Optional local cache capacity in bytes.
    pub cache_capacity_bytes: Option<u64>,
    /// Fingerprint folded into every cache key.
    pub env: EnvFingerprint,
    /// Remote cache settings.
    pub remote: RemoteConfig,
}

/// Resolves relative paths against `project_dir` and fills in defaults.
pub fn resolve_config(config: &BuildConfig, project_dir: &Path) -> ResolvedConfig {
    let cache_directory = if config.cache_directory.is_absolute() {
        config.cache_directory.clone()
    } else {
        project_dir.join(&config.cache_directory)
    };

    let worker_count = config.worker_count.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_WORKERS)
    });

    let mut env = EnvFingerprint::new(
        config.target_runtime_version.clone(),
        config.compiler_version.clone(),
    );
    env.extra = config.env.clone();

    ResolvedConfig {
        cache_directory,
        worker_count: worker_count.max(1),
        cache_capacity_bytes: config.cache_capacity_bytes,
        env,
        remote: config.remote_backend.clone(),
    }
}
