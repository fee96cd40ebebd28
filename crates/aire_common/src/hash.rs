//! Content digests and cache keys.
//!
//! Both types are 256-bit BLAKE3 digests. [`ContentHash`] identifies raw
//! bytes (a source unit or an artifact payload), while [`CacheKey`]
//! identifies a build output and is derived from a unit's content hash, the
//! keys of its dependencies, and the environment fingerprint.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Length in bytes of every digest produced by the toolchain.
pub const DIGEST_LEN: usize = 32;

/// Error returned when parsing a digest from its hex representation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDigestError {
    /// The string does not contain exactly 64 characters.
    #[error("expected {expected} hex characters, got {actual}")]
    InvalidLength {
        /// Required number of characters.
        expected: usize,
        /// Number of characters found.
        actual: usize,
    },
    /// The string contains a character that is not a hex digit.
    #[error("invalid hex character at offset {0}")]
    InvalidCharacter(usize),
}

fn write_hex(bytes: &[u8; DIGEST_LEN], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

fn parse_hex(s: &str) -> Result<[u8; DIGEST_LEN], ParseDigestError> {
    if s.len() != DIGEST_LEN * 2 {
        return Err(ParseDigestError::InvalidLength {
            expected: DIGEST_LEN * 2,
            actual: s.len(),
        });
    }
    let mut out = [0u8; DIGEST_LEN];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let hi = hex_value(chunk[0]).ok_or(ParseDigestError::InvalidCharacter(i * 2))?;
        let lo = hex_value(chunk[1]).ok_or(ParseDigestError::InvalidCharacter(i * 2 + 1))?;
        out[i] = (hi << 4) | lo;
    }
    Ok(out)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Implements hex display, parsing, and string-based serde for a digest newtype.
macro_rules! digest_newtype {
    ($name:ident, $label:literal) => {
        impl $name {
            /// Wraps raw digest bytes.
            pub const fn from_raw(bytes: [u8; DIGEST_LEN]) -> Self {
                Self(bytes)
            }

            /// Returns the raw digest bytes.
            pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
                &self.0
            }

            /// Parses a digest from 64 hex characters.
            pub fn from_hex(s: &str) -> Result<Self, ParseDigestError> {
                parse_hex(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_hex(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!($label, "({:02x}{:02x}{:02x}{:02x}..)"),
                    self.0[0], self.0[1], self.0[2], self.0[3]
                )
            }
        }

        impl FromStr for $name {
            type Err = ParseDigestError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct HexVisitor;

                impl Visitor<'_> for HexVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("a 64-character hex digest")
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<$name, E> {
                        $name::from_hex(v).map_err(E::custom)
                    }
                }

                deserializer.deserialize_str(HexVisitor)
            }
        }
    };
}

/// A 256-bit BLAKE3 digest of raw bytes.
///
/// Identical bytes always produce identical hashes. The hash of the empty
/// input is [`ContentHash::EMPTY`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; DIGEST_LEN]);

impl ContentHash {
    /// BLAKE3 digest of the empty byte string.
    pub const EMPTY: ContentHash = ContentHash([
        0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc,
        0xc9, 0x49, 0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca,
        0xe4, 0x1f, 0x32, 0x62,
    ]);

    /// Computes the content hash of a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }
}

digest_newtype!(ContentHash, "ContentHash");

/// Identity of a build output.
///
/// Derived from a unit's own [`ContentHash`], the cache keys of all of its
/// direct dependencies, and the environment fingerprint. Two units with equal
/// cache keys are assumed to compile to identical artifacts, so every input
/// that can influence compiler output must be folded into the key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; DIGEST_LEN]);

digest_newtype!(CacheKey, "CacheKey");

impl CacheKey {
    /// Returns the two-character shard prefix used to spread entries over
    /// subdirectories.
    pub fn shard(&self) -> String {
        format!("{:02x}", self.0[0])
    }
}
