//! The compiler seam between the build core and the language front end.

use std::collections::BTreeMap;

use aire_cache::Artifact;
use aire_graph::BuildUnit;
use bytes::Bytes;

/// A unit failed to compile. Recorded in the build report; never fatal to the
/// build as a whole.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    /// Human-readable diagnostic from the compiler.
    pub message: String,
}

impl CompileError {
    /// Creates a compile error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Turns one build unit into compiled bytes.
///
/// Called on the blocking thread pool, possibly from several threads at once.
/// Must be deterministic: the same unit and dependency artifacts must always
/// produce the same bytes, since results are shared through the cache.
pub trait Compiler: Send + Sync {
    /// Compiles `unit`. `deps` holds the artifact of every direct dependency,
    /// keyed by unit name.
    fn compile(
        &self,
        unit: &BuildUnit,
        deps: &BTreeMap<String, Artifact>,
    ) -> Result<Bytes, CompileError>;
}

impl<F> Compiler for F
where
    F: Fn(&BuildUnit, &BTreeMap<String, Artifact>) -> Result<Bytes, CompileError> + Send + Sync,
{
    fn compile(
        &self,
        unit: &BuildUnit,
        deps: &BTreeMap<String, Artifact>,
    ) -> Result<Bytes, CompileError> {
        self(unit, deps)
    }
}
