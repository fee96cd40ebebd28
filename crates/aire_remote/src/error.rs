//! Error types for remote cache operations.

/// Errors produced by remote backends and the [`RemoteCache`](crate::RemoteCache)
/// wrapper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request did not complete within the configured timeout.
    #[error("{backend}: request timed out after {after_ms}ms")]
    Timeout {
        /// Backend name.
        backend: String,
        /// The timeout that elapsed.
        after_ms: u64,
    },

    /// The request failed before a response was received.
    #[error("{backend}: transport error: {reason}")]
    Transport {
        /// Backend name.
        backend: String,
        /// Description of the failure.
        reason: String,
    },

    /// The remote answered with an unexpected HTTP status.
    #[error("{backend}: unexpected status {status}")]
    Status {
        /// Backend name.
        backend: String,
        /// HTTP status code.
        status: u16,
    },

    /// Retries were exhausted or the cache was already marked unavailable.
    #[error("remote cache {backend} unavailable: {reason}")]
    Unavailable {
        /// Backend name.
        backend: String,
        /// The last underlying failure.
        reason: String,
    },

    /// The operation was cancelled.
    #[error("remote operation cancelled")]
    Cancelled,

    /// The remote backend configuration is unusable.
    #[error("invalid remote configuration: {0}")]
    Config(String),
}

impl RemoteError {
    /// Returns `true` if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout { .. } | RemoteError::Transport { .. } => true,
            RemoteError::Status { status, .. } => is_transient_status(*status),
            RemoteError::Unavailable { .. } | RemoteError::Cancelled | RemoteError::Config(_) => {
                false
            }
        }
    }
}

/// Request timeout, rate limiting and server errors are worth retrying.
pub(crate) fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}
