//! Content hashing and cache-key derivation.
//!
//! A cache key is the BLAKE3 hash of the following byte sequence, in order:
//!
//! 1. the domain tag [`KEY_DOMAIN`];
//! 2. the unit's own content hash (32 bytes);
//! 3. the number of dependencies as a little-endian `u64`;
//! 4. for each dependency, sorted by name: the name (length-prefixed) and its
//!    cache key (32 bytes);
//! 5. the target runtime version and compiler version (length-prefixed);
//! 6. the number of extra environment fields, then each name and value
//!    (length-prefixed) in name order.
//!
//! Length prefixes are little-endian `u64`. Declaration order of dependencies
//! never reaches the hasher.

use std::path::Path;

use aire_common::{CacheKey, ContentHash, EnvFingerprint};
use aire_graph::BuildUnit;

use crate::error::CacheError;

/// Domain separation tag hashed first into every cache key.
pub const KEY_DOMAIN: &[u8] = b"aire-cache-key/v1";

/// Computes content hashes and derives cache keys.
pub struct ContentHasher;

impl ContentHasher {
    /// Hashes a byte slice.
    pub fn hash(data: &[u8]) -> ContentHash {
        ContentHash::from_bytes(data)
    }

    /// Reads a file and returns its content hash.
    pub fn hash_file(path: &Path) -> Result<ContentHash, CacheError> {
        let content = std::fs::read(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(ContentHash::from_bytes(&content))
    }

    /// Derives the cache key of `unit` from its content hash, the keys of its
    /// direct dependencies, and the environment fingerprint.
    ///
    /// `dep_keys` may be in any order.
    pub fn derive_cache_key(
        unit: &BuildUnit,
        dep_keys: &[(&str, CacheKey)],
        env: &EnvFingerprint,
    ) -> CacheKey {
        Self::derive_from_parts(unit.content_hash(), dep_keys, env)
    }

    /// Derives a cache key from already-computed parts.
    pub fn derive_from_parts(
        unit_hash: ContentHash,
        dep_keys: &[(&str, CacheKey)],
        env: &EnvFingerprint,
    ) -> CacheKey {
        let mut deps: Vec<(&str, CacheKey)> = dep_keys.to_vec();
        deps.sort();
        deps.dedup();

        let mut hasher = blake3::Hasher::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(unit_hash.as_bytes());

        hasher.update(&(deps.len() as u64).to_le_bytes());
        for (name, key) in &deps {
            update_prefixed(&mut hasher, name.as_bytes());
            hasher.update(key.as_bytes());
        }

        update_prefixed(&mut hasher, env.target_runtime_version.as_bytes());
        update_prefixed(&mut hasher, env.compiler_version.as_bytes());
        hasher.update(&(env.extra.len() as u64).to_le_bytes());
        for (name, value) in &env.extra {
            update_prefixed(&mut hasher, name.as_bytes());
            update_prefixed(&mut hasher, value.as_bytes());
        }

        CacheKey::from_raw(*hasher.finalize().as_bytes())
    }
}

fn update_prefixed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
