//! Source units and build units.

use aire_common::ContentHash;
use bytes::Bytes;

/// A discovered source module before its dependencies are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Logical module path (e.g. `"app.http.router"`).
    pub name: String,
    /// Raw source bytes.
    pub content: Bytes,
}

impl SourceUnit {
    /// Creates a source unit from a name and its content.
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// The language front end's view of a source unit's imports.
///
/// Implementations must be deterministic: identical source units must always
/// yield identical dependency lists, since cache correctness relies on it.
pub trait DependencyResolver {
    /// Returns the names of the units `source` directly depends on, in
    /// declaration order.
    fn resolve_dependencies(&self, source: &SourceUnit) -> Vec<String>;
}

impl<F> DependencyResolver for F
where
    F: Fn(&SourceUnit) -> Vec<String>,
{
    fn resolve_dependencies(&self, source: &SourceUnit) -> Vec<String> {
        self(source)
    }
}

/// One compilable source module with its declared dependencies.
///
/// Immutable for the duration of a build. A content change between
/// invocations produces a new `BuildUnit` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    name: String,
    content: Bytes,
    dependencies: Vec<String>,
    content_hash: ContentHash,
}

impl BuildUnit {
    /// Creates a build unit with an explicit dependency list.
    pub fn new(
        name: impl Into<String>,
        content: impl Into<Bytes>,
        dependencies: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            content_hash: ContentHash::from_bytes(&content),
            content,
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a unit from a source unit, asking `resolver` for its dependencies.
    pub fn from_source(source: SourceUnit, resolver: &dyn DependencyResolver) -> Self {
        let dependencies = resolver.resolve_dependencies(&source);
        Self::new(source.name, source.content, dependencies)
    }

    /// The unit's logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit's raw content.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Declared dependency names, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Hash of the unit's own content, computed once at construction.
    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }
}
