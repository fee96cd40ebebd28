//! Remote artifact caches shared between machines.
//!
//! A [`RemoteBackend`] moves encoded artifacts to and from one kind of store
//! (S3-compatible or GCS object storage, a plain HTTP server, or nothing at
//! all). The build talks to a [`RemoteCache`], which adds timeouts, retries,
//! cancellation and the degrade-to-local behavior on top of any backend.

#![warn(missing_docs)]

pub mod backend;
pub mod client;
pub mod credential;
pub mod error;
pub mod http;
pub mod object_store;
pub mod retry;

pub use backend::{backend_from_config, DisabledBackend, RemoteBackend};
pub use client::{RemoteCache, RemoteStats};
pub use credential::Credential;
pub use error::RemoteError;
pub use http::HttpBackend;
pub use object_store::{ObjectStoreBackend, ObjectStoreFlavour};
pub use retry::RetryPolicy;
