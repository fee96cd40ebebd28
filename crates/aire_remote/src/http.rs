//! Plain HTTP remote cache and the request plumbing shared with object stores.
//!
//! An HTTP cache is any server answering `GET <endpoint>/<prefix><key>` with
//! the stored bytes (404 when absent) and accepting `PUT` to the same URL.

use std::time::Duration;

use aire_common::CacheKey;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, StatusCode};

use crate::backend::RemoteBackend;
use crate::credential::Credential;
use crate::error::RemoteError;

/// A pooled HTTP client bound to one backend.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    client: Client,
    credential: Option<Credential>,
    backend: &'static str,
    timeout: Duration,
}

impl Transport {
    pub(crate) fn new(
        backend: &'static str,
        credential: Option<Credential>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Config(format!("{backend}: cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            credential,
            backend,
            timeout,
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        self.backend
    }

    /// `GET url`; 404 is `Ok(None)`.
    pub(crate) async fn get(&self, url: &str) -> Result<Option<Bytes>, RemoteError> {
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .bytes()
                .await
                .map(Some)
                .map_err(|e| self.request_error(e)),
            status => Err(self.status_error(status)),
        }
    }

    /// `PUT url` with `body`.
    pub(crate) async fn put(&self, url: &str, body: Bytes) -> Result<(), RemoteError> {
        let response = self
            .authorize(self.client.put(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.status_error(status))
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Some(credential) => request.bearer_auth(credential.expose()),
            None => request,
        }
    }

    fn request_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout {
                backend: self.backend.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            RemoteError::Transport {
                backend: self.backend.to_string(),
                reason: err.to_string(),
            }
        }
    }

    fn status_error(&self, status: StatusCode) -> RemoteError {
        RemoteError::Status {
            backend: self.backend.to_string(),
            status: status.as_u16(),
        }
    }
}

/// Joins URL segments with exactly one `/` between them.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// A remote cache served by a plain HTTP server.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    endpoint: String,
    prefix: String,
    transport: Transport,
}

impl HttpBackend {
    /// Creates a backend for `endpoint`, storing objects under `prefix`.
    pub fn new(
        endpoint: &str,
        prefix: &str,
        credential: Option<Credential>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(RemoteError::Config(format!(
                "http: endpoint `{endpoint}` must be an http(s) URL"
            )));
        }
        Ok(Self {
            endpoint: endpoint.to_string(),
            prefix: prefix.to_string(),
            transport: Transport::new("http", credential, timeout)?,
        })
    }

    /// URL of the object holding `key`.
    pub fn object_url(&self, key: &CacheKey) -> String {
        join_url(&self.endpoint, &format!("{}{key}", self.prefix))
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
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
