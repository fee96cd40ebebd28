//! The fail-soft remote cache client used by the build.
//!
//! [`RemoteCache`] wraps a [`RemoteBackend`] with per-request timeouts,
//! retries and cancellation. A remote that stops answering never fails a
//! build: once retries are exhausted the client marks itself degraded, logs
//! `RemoteCacheUnavailable` once, and skips the remote for the rest of the
//! build.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aire_common::CacheKey;
use aire_config::RemoteConfig;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{backend_from_config, DisabledBackend, RemoteBackend};
use crate::error::RemoteError;
use crate::retry::RetryPolicy;

/// Point-in-time counters of a [`RemoteCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStats {
    /// Fetches that returned bytes.
    pub hits: u64,
    /// Fetches that found nothing.
    pub misses: u64,
    /// Fetches that failed after all retries.
    pub failures: u64,
    /// Calls skipped because the remote was degraded.
    pub degraded_skips: u64,
    /// Successful publishes.
    pub publishes: u64,
    /// Publishes that failed after all retries.
    pub publish_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    degraded_skips: AtomicU64,
    publishes: AtomicU64,
    publish_failures: AtomicU64,
}

/// Remote cache client with timeout, retry and degradation handling.
///
/// Cheap to share: wrap in an `Arc`.
pub struct RemoteCache {
    backend: Arc<dyn RemoteBackend>,
    policy: RetryPolicy,
    timeout: Duration,
    enabled: bool,
    degraded: AtomicBool,
    counters: Counters,
}

impl RemoteCache {
    /// Wraps `backend`.
    pub fn new(backend: Arc<dyn RemoteBackend>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            backend,
            policy,
            timeout,
            enabled: true,
            degraded: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// A client that always misses without touching the network.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Arc::new(DisabledBackend), RetryPolicy::no_retry(), Duration::ZERO)
        }
    }

    /// Builds the client described by a `[remote_backend]` section.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        if config.kind == aire_config::RemoteKind::None {
            return Ok(Self::disabled());
        }
        Ok(Self::new(
            backend_from_config(config)?,
            RetryPolicy::from_config(config),
            Duration::from_millis(config.timeout_ms),
        ))
    }

    /// Name of the wrapped backend.
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Returns `false` for a client built by [`disabled`](Self::disabled).
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` once the remote has been given up on for this build.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Clears the degraded state so a new build tries the remote again.
    pub fn reset_for_build(&self) {
        self.degraded.store(false, Ordering::Release);
    }

    /// Fetches the bytes stored under `key`.
    ///
    /// Remote failures are logged and reported as a miss (`Ok(None)`); the only
    /// error returned is [`RemoteError::Cancelled`].
    pub async fn fetch(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, RemoteError> {
        if !self.enabled {
            return Ok(None);
        }
        if self.is_degraded() {
            self.counters.degraded_skips.fetch_add(1, Ordering::Relaxed);
            debug!(%key, backend = self.name(), "remote degraded, skipping fetch");
            return Ok(None);
        }

        let backend = Arc::clone(&self.backend);
        let key_owned = *key;
        let result = self
            .with_retry("fetch", cancel, || {
                let backend = Arc::clone(&backend);
                async move { backend.fetch(&key_owned).await }
            })
            .await;

        match result {
            Ok(Some(bytes)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, backend = self.name(), size = bytes.len(), "remote cache hit");
                Ok(Some(bytes))
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(%key, backend = self.name(), "remote cache miss");
                Ok(None)
            }
            Err(RemoteError::Cancelled) => Err(RemoteError::Cancelled),
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.mark_degraded(&err);
                Ok(None)
            }
        }
    }

    /// Stores `data` under `key`.
    ///
    /// Failures are logged and counted. Callers treat the returned error as
    /// informational; a failed publish never fails a build.
    pub async fn publish(
        &self,
        key: &CacheKey,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        if !self.enabled {
            return Ok(());
        }
        if self.is_degraded() {
            self.counters.degraded_skips.fetch_add(1, Ordering::Relaxed);
            debug!(%key, backend = self.name(), "remote degraded, skipping publish");
            return Err(RemoteError::Unavailable {
                backend: self.name().to_string(),
                reason: "remote marked unavailable earlier in this build".to_string(),
            });
        }

        let backend = Arc::clone(&self.backend);
        let key_owned = *key;
        let result = self
            .with_retry("publish", cancel, || {
                let backend = Arc::clone(&backend);
                let data = data.clone();
                async move { backend.publish(&key_owned, data).await }
            })
            .await;

        match result {
            Ok(()) => {
                self.counters.publishes.fetch_add(1, Ordering::Relaxed);
                debug!(%key, backend = self.name(), "published artifact");
                Ok(())
            }
            Err(err) => {
                if err != RemoteError::Cancelled {
                    self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(%key, backend = self.name(), error = %err, "failed to publish artifact");
                }
                Err(err)
            }
        }
    }

    /// Current counters.
    pub fn stats(&self) -> RemoteStats {
        RemoteStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            degraded_skips: self.counters.degraded_skips.load(Ordering::Relaxed),
            publishes: self.counters.publishes.load(Ordering::Relaxed),
            publish_failures: self.counters.publish_failures.load(Ordering::Relaxed),
        }
    }

    fn mark_degraded(&self, err: &RemoteError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                backend = self.name(),
                error = %err,
                "RemoteCacheUnavailable: continuing with local cache only"
            );
        }
    }

    /// Runs `operation` with a timeout per attempt, retrying transient errors
    /// with backoff until the policy is exhausted.
    async fn with_retry<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                outcome = tokio::time::timeout(self.timeout, operation()) => outcome,
            };
            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => RemoteError::Timeout {
                    backend: self.name().to_string(),
                    after_ms: self.timeout.as_millis() as u64,
                },
            };

            if !err.is_transient() {
                debug!(backend = self.name(), operation_name, error = %err, "non-retryable remote error");
                return Err(err);
            }
            if attempt >= self.policy.max_retries {
                return Err(RemoteError::Unavailable {
                    backend: self.name().to_string(),
                    reason: format!("{err} (after {} attempts)", attempt + 1),
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            debug!(
                backend = self.name(),
                operation_name,
                attempt = attempt + 1,
                ?delay,
                error = %err,
                "remote attempt failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("backend", &self.backend.name())
            .field("enabled", &self.enabled)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}
