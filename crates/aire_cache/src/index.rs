//! Persisted recency index of the local store.
//!
//! Stored as `index.json` in the cache directory. The index only carries
//! eviction order; the artifact files themselves are authoritative, so a
//! missing or unreadable index just means recency starts over.

use std::path::Path;

use aire_common::CacheKey;
use serde::{Deserialize, Serialize};

use crate::artifact::ARTIFACT_FORMAT_VERSION;
use crate::error::CacheError;

/// Name of the index file within the cache directory.
pub const INDEX_FILE: &str = "index.json";

/// Snapshot of the store's entries in least-recently-used-first order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Artifact format version of the store that wrote the index.
    pub format_version: u32,

    /// Entries, least recently used first.
    pub entries: Vec<IndexEntry>,
}

/// One stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Cache key of the artifact.
    pub key: CacheKey,
    /// Size of the artifact file in bytes.
    pub size: u64,
}

impl CacheIndex {
    /// Creates an index from `(key, size)` pairs in recency order.
    pub fn from_snapshot(entries: impl IntoIterator<Item = (CacheKey, u64)>) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            entries: entries
                .into_iter()
                .map(|(key, size)| IndexEntry { key, size })
                .collect(),
        }
    }

    /// Loads the index from the cache directory, returning `None` if the file
    /// is missing, unparsable, or from another format version.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(cache_dir.join(INDEX_FILE)).ok()?;
        serde_json::from_str::<Self>(&content)
            .ok()
            .filter(|index| index.format_version == ARTIFACT_FORMAT_VERSION)
    }

    /// Parses an index, reporting why it could not be read.
    pub fn parse(content: &str) -> Result<Self, CacheError> {
        serde_json::from_str(content).map_err(|e| CacheError::IndexParse {
            reason: e.to_string(),
        })
    }

    /// Writes the index to the cache directory through a temporary file.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

        let path = cache_dir.join(INDEX_FILE);
        let tmp = cache_dir.join(format!("{INDEX_FILE}.{}.tmp", std::process::id()));
        std::fs::write(&tmp, json).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path, source: e })
    }
}
