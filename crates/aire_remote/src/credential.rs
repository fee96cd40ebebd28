//! Opaque remote cache credentials.

use std::fmt;

use crate::error::RemoteError;

/// A bearer token for a remote cache, resolved from a `credentials_ref`.
///
/// The reference forms are `env:NAME` (environment variable), `file:PATH`
/// (file contents, trimmed), or anything else taken literally.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps an already-known secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Resolves a `credentials_ref`.
    pub fn resolve(reference: &str) -> Result<Self, RemoteError> {
        let secret = if let Some(var) = reference.strip_prefix("env:") {
            std::env::var(var).map_err(|_| {
                RemoteError::Config(format!("credential variable `{var}` is not set"))
            })?
        } else if let Some(path) = reference.strip_prefix("file:") {
            std::fs::read_to_string(path)
                .map_err(|e| RemoteError::Config(format!("cannot read credential file `{path}`: {e}")))?
                .trim()
                .to_string()
        } else {
            reference.to_string()
        };

        if secret.is_empty() {
            return Err(RemoteError::Config("credential is empty".to_string()));
        }
        Ok(Self(secret))
    }

    /// The secret value, for placing in a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
