//! S3-compatible and Google Cloud Storage remote caches.
//!
//! Both are addressed path-style over their HTTP APIs:
//! `<endpoint>/<bucket>/<prefix><shard>/<key>`. GCS defaults to the public
//! XML API endpoint; S3 requires an explicit endpoint (AWS region URL, MinIO,
//! and so on).

use std::time::Duration;

use aire_common::CacheKey;
use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::RemoteBackend;
use crate::credential::Credential;
use crate::error::RemoteError;
use crate::http::{join_url, Transport};

/// Public endpoint of the GCS XML API.
pub const GCS_DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Which object store API a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStoreFlavour {
    /// S3-compatible storage.
    S3,
    /// Google Cloud Storage.
    Gcs,
}

impl ObjectStoreFlavour {
    fn name(self) -> &'static str {
        match self {
            ObjectStoreFlavour::S3 => "s3",
            ObjectStoreFlavour::Gcs => "gcs",
        }
    }
}

/// A remote cache in an object store bucket.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    flavour: ObjectStoreFlavour,
    bucket_url: String,
    prefix: String,
    transport: Transport,
}

impl ObjectStoreBackend {
    /// Creates a backend for `bucket`.
    ///
    /// `endpoint` may be omitted for GCS only.
    pub fn new(
        flavour: ObjectStoreFlavour,
        endpoint: Option<&str>,
        bucket: &str,
        prefix: &str,
        credential: Option<Credential>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let endpoint = match (flavour, endpoint) {
            (_, Some(endpoint)) => endpoint,
            (ObjectStoreFlavour::Gcs, None) => GCS_DEFAULT_ENDPOINT,
            (ObjectStoreFlavour::S3, None) => {
                return Err(RemoteError::Config(
                    "s3: an endpoint is required".to_string(),
                ))
            }
        };
        if bucket.is_empty() || bucket.contains('/') {
            return Err(RemoteError::Config(format!(
                "{}: invalid bucket name `{bucket}`",
                flavour.name()
            )));
        }

        Ok(Self {
            flavour,
            bucket_url: join_url(endpoint, bucket),
            prefix: prefix.to_string(),
            transport: Transport::new(flavour.name(), credential, timeout)?,
        })
    }

    /// The API this backend speaks.
    pub fn flavour(&self) -> ObjectStoreFlavour {
        self.flavour
    }

    /// Object name of `key` within the bucket.
    pub fn object_name(&self, key: &CacheKey) -> String {
        format!("{}{}/{key}", self.prefix, key.shard())
    }

    /// URL of the object holding `key`.
    pub fn object_url(&self, key: &CacheKey) -> String {
        join_url(&self.bucket_url, &self.object_name(key))
    }
}

#[async_trait]
impl RemoteBackend for ObjectStoreBackend {
    async fn fetch(&self, key: &CacheKey) -> Result<Option<Bytes>, RemoteError> {
        self.transport.get(&self.object_url(key)).await
    }

    async fn publish(&self, key: &CacheKey, data: Bytes) -> Result<(), RemoteError> {
        self.transport.put(&self.object_url(key), data).await
    }

    fn name(&self) -> &str {
        self.transport.name()
    }
}
