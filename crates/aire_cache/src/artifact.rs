//! Compiled artifacts and their self-verifying binary encoding.
//!
//! An encoded artifact is a 4-byte little-endian header length, a bincode
//! [`ArtifactHeader`], and the payload. The header records the cache key the
//! artifact was built for, so an entry can be verified against the key used
//! to look it up. The same encoding is used on disk and on the wire to remote
//! caches.

use aire_common::CacheKey;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CorruptionKind};

/// Magic bytes identifying an Aire cache artifact.
pub const ARTIFACT_MAGIC: [u8; 4] = *b"AIRE";

/// Current artifact format version. Increment on breaking changes to
/// the header or payload format.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every encoded artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes: must be `b"AIRE"`.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// Cache key the artifact was built from.
    pub key: CacheKey,

    /// When the artifact was produced.
    pub created_at: DateTime<Utc>,

    /// Payload length in bytes.
    pub size: u64,

    /// XXH3-128 checksum of the payload.
    pub checksum: u128,
}

/// Compiled output for one build unit.
///
/// Cloning is cheap: the payload is a shared buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    key: CacheKey,
    created_at: DateTime<Utc>,
    data: Bytes,
}

impl Artifact {
    /// Creates an artifact stamped with the current time.
    pub fn new(key: CacheKey, data: impl Into<Bytes>) -> Self {
        Self {
            key,
            created_at: Utc::now(),
            data: data.into(),
        }
    }

    /// Creates an artifact with an explicit creation time.
    pub fn with_created_at(key: CacheKey, data: impl Into<Bytes>, created_at: DateTime<Utc>) -> Self {
        Self {
            key,
            created_at,
            data: data.into(),
        }
    }

    /// The cache key this artifact was built from.
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// When the artifact was produced.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The compiled bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Encodes the artifact with its validation header.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            key: self.key,
            created_at: self.created_at,
            size: self.size(),
            checksum: checksum(&self.data),
        };

        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + self.data.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&self.data);
        Ok(output)
    }

    /// Decodes and verifies an encoded artifact expected to belong to `key`.
    ///
    /// Any failed check is reported as [`CacheError::Corruption`]; bad data is
    /// never returned.
    pub fn decode(key: &CacheKey, raw: &[u8]) -> Result<Self, CacheError> {
        let corrupt = |kind| CacheError::Corruption { key: *key, kind };

        if raw.len() < 4 {
            return Err(corrupt(CorruptionKind::Truncated));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&raw[..4]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if raw.len() - 4 < header_len {
            return Err(corrupt(CorruptionKind::Truncated));
        }

        let (header, _): (ArtifactHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .map_err(|e| corrupt(CorruptionKind::InvalidHeader(e.to_string())))?;

        if header.magic != ARTIFACT_MAGIC {
            return Err(corrupt(CorruptionKind::BadMagic));
        }
        if header.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(corrupt(CorruptionKind::VersionMismatch {
                expected: ARTIFACT_FORMAT_VERSION,
                actual: header.format_version,
            }));
        }
        if header.key != *key {
            return Err(corrupt(CorruptionKind::KeyMismatch { found: header.key }));
        }

        let payload = &raw[4 + header_len..];
        if payload.len() as u64 != header.size {
            return Err(corrupt(CorruptionKind::SizeMismatch {
                expected: header.size,
                actual: payload.len() as u64,
            }));
        }
        let actual = checksum(payload);
        if actual != header.checksum {
            return Err(corrupt(CorruptionKind::ChecksumMismatch {
                expected: header.checksum,
                actual,
            }));
        }

        Ok(Self {
            key: header.key,
            created_at: header.created_at,
            data: Bytes::copy_from_slice(payload),
        })
    }
}

fn checksum(data: &[u8]) -> u128 {
    xxhash_rust::xxh3::xxh3_128(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aire_common::DIGEST_LEN;

    fn key(byte: u8) -> CacheKey {
        CacheKey::from_raw([byte; DIGEST_LEN])
    }

    fn encode_with(header: &ArtifactHeader, payload: &[u8]) -> Vec<u8> {
        let header_bytes =
            bincode::serde::encode_to_vec(header, bincode::config::standard()).unwrap();
        let mut output = Vec::new();
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(payload);
        output
    }

    fn header_for(k: CacheKey, payload: &[u8]) -> ArtifactHeader {
        ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            key: k,
            created_at: Utc::now(),
            size: payload.len() as u64,
            checksum: checksum(payload),
        }
    }

    fn corruption_kind(err: CacheError) -> CorruptionKind {
        match err {
            CacheError::Corruption { kind, .. } => kind,
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn encode_decode_preserves_metadata() {
        let artifact = Artifact::new(key(1), &b"beam bytes"[..]);
        let raw = artifact.encode().unwrap();
        let back = Artifact::decode(&key(1), &raw).unwrap();
        assert_eq!(back, artifact);
        assert_eq!(back.size(), 10);
    }

    #[test]
    fn empty_payload_is_valid() {
        let artifact = Artifact::new(key(2), Bytes::new());
        let raw = artifact.encode().unwrap();
        assert_eq!(Artifact::decode(&key(2), &raw).unwrap().size(), 0);
    }

    #[test]
    fn truncated_input_rejected() {
        let err = Artifact::decode(&key(1), b"AB").unwrap_err();
        assert_eq!(corruption_kind(err), CorruptionKind::Truncated);

        let mut raw = Artifact::new(key(1), &b"data"[..]).encode().unwrap();
        raw.truncate(6);
        let err = Artifact::decode(&key(1), &raw).unwrap_err();
        assert_eq!(corruption_kind(err), CorruptionKind::Truncated);
    }

    #[test]
    fn garbage_header_rejected() {
        let mut raw = vec![4, 0, 0, 0];
        raw.extend_from_slice(b"\xff\xff\xff\xff");
        let err = Artifact::decode(&key(1), &raw).unwrap_err();
        assert!(matches!(
            corruption_kind(err),
            CorruptionKind::InvalidHeader(_)
        ));
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut header = header_for(key(1), b"data");
        header.magic = *b"BAAD";
        let err = Artifact::decode(&key(1), &encode_with(&header, b"data")).unwrap_err();
        assert_eq!(corruption_kind(err), CorruptionKind::BadMagic);
    }

    #[test]
    fn wrong_version_rejected() {
        let mut header = header_for(key(1), b"data");
        header.format_version = 999;
        let err = Artifact::decode(&key(1), &encode_with(&header, b"data")).unwrap_err();
        assert_eq!(
            corruption_kind(err),
            CorruptionKind::VersionMismatch {
                expected: ARTIFACT_FORMAT_VERSION,
                actual: 999
            }
        );
    }

    #[test]
    fn entry_for_other_key_rejected() {
        let raw = Artifact::new(key(1), &b"data"[..]).encode().unwrap();
        let err = Artifact::decode(&key(9), &raw).unwrap_err();
        assert_eq!(
            corruption_kind(err),
            CorruptionKind::KeyMismatch { found: key(1) }
        );
    }

    #[test]
    fn tampered_payload_rejected() {
        let header = header_for(key(1), b"data");
        let err = Artifact::decode(&key(1), &encode_with(&header, b"DATA")).unwrap_err();
        assert!(matches!(
            corruption_kind(err),
            CorruptionKind::ChecksumMismatch { .. }
        ));

        let err = Artifact::decode(&key(1), &encode_with(&header, b"data!")).unwrap_err();
        assert_eq!(
            corruption_kind(err),
            CorruptionKind::SizeMismatch {
                expected: 4,
                actual: 5
            }
        );
    }
}
