//! Shared foundational types used across the Aire build toolchain.
//!
//! This crate provides the content digest used to identify source units, the
//! cache key that identifies compiled artifacts, and the environment
//! fingerprint folded into every cache key.

#![warn(missing_docs)]

pub mod env;
pub mod hash;

pub use env::EnvFingerprint;
pub use hash::{CacheKey, ContentHash, ParseDigestError, DIGEST_LEN};
