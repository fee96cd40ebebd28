//! Incremental, cache-aware builds of Aire units.
//!
//! The [`Orchestrator`] validates the dependency graph, derives a cache key
//! for every unit, and satisfies each unit from the local store, the remote
//! cache, or the [`Compiler`], in that order. Every build yields a
//! [`BuildReport`] with one [`BuildResult`] per unit.
//!
//! Installing a `tracing` subscriber is left to the caller.

#![warn(missing_docs)]

pub mod compiler;
pub mod error;
pub mod orchestrator;
pub mod report;

pub use compiler::{CompileError, Compiler};
pub use error::BuildError;
pub use orchestrator::Orchestrator;
pub use report::{ArtifactRef, BuildReport, BuildResult, Outcome};
