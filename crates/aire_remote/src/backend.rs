//! The remote backend abstraction.

use std::sync::Arc;
use std::time::Duration;

use aire_common::CacheKey;
use aire_config::{RemoteConfig, RemoteKind};
use async_trait::async_trait;
use bytes::Bytes;

use crate::credential::Credential;
use crate::error::RemoteError;
use crate::http::HttpBackend;
use crate::object_store::{ObjectStoreBackend, ObjectStoreFlavour};

/// A shared store of encoded artifacts addressed by cache key.
///
/// Implementations perform a single attempt per call; timeouts and retries
/// are applied by [`RemoteCache`](crate::RemoteCache).
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Fetches the bytes stored under `key`. `Ok(None)` means not present.
    async fn fetch(&self, key: &CacheKey) -> Result<Option<Bytes>, RemoteError>;

    /// Stores `data` under `key`.
    async fn publish(&self, key: &CacheKey, data: Bytes) -> Result<(), RemoteError>;

    /// Short name used in logs and errors.
    fn name(&self) -> &str;
}

/// A backend that never has anything and accepts nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBackend;

#[async_trait]
impl RemoteBackend for DisabledBackend {
    async fn fetch(&self, _key: &CacheKey) -> Result<Option<Bytes>, RemoteError> {
        Ok(None)
    }

    async fn publish(&self, _key: &CacheKey, _data: Bytes) -> Result<(), RemoteError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// Builds the backend described by a `[remote_backend]` section.
pub fn backend_from_config(config: &RemoteConfig) -> Result<Arc<dyn RemoteBackend>, RemoteError> {
    let credential = config
        .credentials_ref
        .as_deref()
        .map(Credential::resolve)
        .transpose()?;
    let timeout = Duration::from_millis(config.timeout_ms);

    let backend: Arc<dyn RemoteBackend> = match config.kind {
        RemoteKind::None => Arc::new(DisabledBackend),
        RemoteKind::Http => {
            let endpoint = required(&config.endpoint, "endpoint", config.kind)?;
            Arc::new(HttpBackend::new(endpoint, &config.prefix, credential, timeout)?)
        }
        RemoteKind::S3 | RemoteKind::Gcs => {
            let flavour = if config.kind == RemoteKind::S3 {
                ObjectStoreFlavour::S3
            } else {
                ObjectStoreFlavour::Gcs
            };
            let bucket = required(&config.bucket, "bucket", config.kind)?;
            Arc::new(ObjectStoreBackend::new(
                flavour,
                config.endpoint.as_deref(),
                bucket,
                &config.prefix,
                credential,
                timeout,
            )?)
        }
    };
    Ok(backend)
}

fn required<'a>(
    value: &'a Option<String>,
    field: &str,
    kind: RemoteKind,
) -> Result<&'a str, RemoteError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RemoteError::Config(format!("`{field}` is required for `{kind}` remotes")))
}
