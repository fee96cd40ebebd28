//! Error types for cache operations.

use std::path::PathBuf;

use aire_common::CacheKey;

/// Errors that can occur during cache operations.
///
/// Lookups are fail-safe from the build's point of view: the orchestrator
/// treats every error returned by a `get` as a cache miss. The variants exist
/// so the cause can be logged.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A stored artifact failed its integrity check. The entry has been
    /// discarded and should be treated as a miss.
    #[error("corrupt cache entry {key}: {kind}")]
    Corruption {
        /// The key that was requested.
        key: CacheKey,
        /// What was wrong with the entry.
        kind: CorruptionKind,
    },

    /// `put` was called with an artifact built for a different key.
    #[error("artifact key {actual} does not match requested key {expected}")]
    KeyMismatch {
        /// The key passed to `put`.
        expected: CacheKey,
        /// The key recorded in the artifact.
        actual: CacheKey,
    },

    /// The cache index could not be parsed as valid JSON.
    #[error("failed to parse cache index: {reason}")]
    IndexParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl CacheError {
    /// Returns `true` for integrity failures of a stored entry.
    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::Corruption { .. })
    }
}

/// The specific integrity check a stored artifact failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorruptionKind {
    /// The file is shorter than its declared header.
    #[error("truncated entry")]
    Truncated,

    /// The header could not be decoded.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The header does not start with the expected magic bytes.
    #[error("bad magic bytes")]
    BadMagic,

    /// The entry was written by an incompatible format version.
    #[error("format version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The current format version.
        expected: u32,
        /// The version found in the header.
        actual: u32,
    },

    /// The header records a different cache key than the one requested.
    #[error("entry belongs to key {found}")]
    KeyMismatch {
        /// Key recorded in the header.
        found: CacheKey,
    },

    /// The payload length differs from the length recorded in the header.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Length recorded in the header.
        expected: u64,
        /// Actual payload length.
        actual: u64,
    },

    /// The payload checksum does not match the header.
    #[error("checksum mismatch: expected {expected:032x}, got {actual:032x}")]
    ChecksumMismatch {
        /// Checksum recorded in the header.
        expected: u128,
        /// Checksum computed from the payload.
        actual: u128,
    },
}
