//! Build units and the dependency graph that orders them.
//!
//! A [`SourceUnit`] is turned into a [`BuildUnit`] by asking the language
//! front end (a [`DependencyResolver`]) for its direct dependencies. The
//! [`DependencyGraph`] validates that every dependency resolves to a known
//! unit and that the graph is acyclic, and produces a deterministic build
//! order.

#![warn(missing_docs)]

pub mod error;
pub mod graph;
pub mod unit;

pub use error::GraphError;
pub use graph::DependencyGraph;
pub use unit::{BuildUnit, DependencyResolver, SourceUnit};
