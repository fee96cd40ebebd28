//! Environment fingerprint folded into every cache key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Build-environment fields that influence compiler output.
///
/// Every field is hashed into every [`CacheKey`](crate::CacheKey), so changing
/// the target runtime or the compiler invalidates all cached artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvFingerprint {
    /// Identifier of the target runtime (e.g. `"OTP-27"`).
    pub target_runtime_version: String,

    /// Identifier of the compiler producing artifacts.
    pub compiler_version: String,

    /// Additional output-affecting fields such as compile flags.
    ///
    /// Ordered so that hashing is independent of insertion order.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl EnvFingerprint {
    /// Creates a fingerprint with no extra fields.
    pub fn new(
        target_runtime_version: impl Into<String>,
        compiler_version: impl Into<String>,
    ) -> Self {
        Self {
            target_runtime_version: target_runtime_version.into(),
            compiler_version: compiler_version.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Adds an extra field, replacing any previous value under the same name.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }
}
