//! Configuration types deserialized from `aire.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Default cache directory, relative to the project root.
pub const DEFAULT_CACHE_DIRECTORY: &str = ".aire-cache";

/// The top-level build configuration parsed from `aire.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Root directory of the local artifact cache. Relative paths are
    /// resolved against the project directory.
    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,

    /// Remote cache backend settings. Defaults to no remote cache.
    #[serde(default)]
    pub remote_backend: RemoteConfig,

    /// Maximum number of units compiled in parallel. Defaults to the
    /// available parallelism of the machine.
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Target runtime identifier folded into every cache key.
    pub target_runtime_version: String,

    /// Compiler identifier folded into every cache key.
    pub compiler_version: String,

    /// Optional byte capacity of the local cache. Unbounded when absent.
    #[serde(default)]
    pub cache_capacity_bytes: Option<u64>,

    /// Extra output-affecting fields folded into every cache key.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIRECTORY)
}

/// Which remote cache implementation to use.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// S3-compatible object storage (AWS S3, MinIO, ...).
    S3,
    /// Google Cloud Storage.
    Gcs,
    /// Plain HTTP server accepting `GET`/`PUT` by key.
    Http,
    /// No remote cache (default).
    #[default]
    None,
}

impl fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteKind::S3 => "s3",
            RemoteKind::Gcs => "gcs",
            RemoteKind::Http => "http",
            RemoteKind::None => "none",
        };
        f.write_str(s)
    }
}

/// Remote cache backend configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// The backend implementation.
    #[serde(default)]
    pub kind: RemoteKind,

    /// Base URL of the service. Optional for GCS, which has a public default.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bucket name for object-storage backends.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Key prefix prepended to every object name.
    #[serde(default)]
    pub prefix: String,

    /// Opaque reference to the credential: `env:NAME`, `file:PATH`, or a
    /// literal token.
    #[serde(default)]
    pub credentials_ref: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each subsequent one.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: RemoteKind::None,
            endpoint: None,
            bucket: None,
            prefix: String::new(),
            credentials_ref: None,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}
