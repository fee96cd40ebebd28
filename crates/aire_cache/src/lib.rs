//! Content-addressed artifact caching for incremental builds.
//!
//! This crate provides the content hasher that derives cache keys from a
//! unit's content, its dependencies' keys, and the build environment, plus the
//! on-disk [`LocalCacheStore`] that holds compiled artifacts by key with
//! integrity checking and least-recently-used eviction.

#![warn(missing_docs)]

pub mod artifact;
pub mod error;
pub mod eviction;
pub mod hasher;
pub mod index;
pub mod store;

pub use artifact::Artifact;
pub use error::{CacheError, CorruptionKind};
pub use hasher::ContentHasher;
pub use store::{LocalCacheStore, StoreStats};
