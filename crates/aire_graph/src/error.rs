//! Structural errors detected before any compilation starts.

/// Errors raised while constructing or validating a [`DependencyGraph`](crate::DependencyGraph).
///
/// All variants are fatal for a build invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A unit declares a dependency on a name that is not a known unit.
    #[error("unit '{unit}' depends on unknown unit '{dependency}'")]
    UnresolvedDependency {
        /// The unit declaring the dependency.
        unit: String,
        /// The name that could not be resolved.
        dependency: String,
    },

    /// The graph contains a cycle. The path starts and ends with the same unit.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    CyclicDependency {
        /// Units along the cycle, with the first unit repeated at the end.
        path: Vec<String>,
    },

    /// Two units share the same logical name.
    #[error("duplicate unit '{0}'")]
    DuplicateUnit(String),
}
