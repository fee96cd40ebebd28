//! Per-unit build results and the report that collects them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use aire_common::CacheKey;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BuildError;

/// How a unit's artifact was obtained, or why it was not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Found in the local cache.
    CacheHitLocal,
    /// Fetched from the remote cache.
    CacheHitRemote,
    /// Compiled in this build.
    Compiled,
    /// The compiler rejected the unit.
    Failed,
    /// Not attempted because a dependency did not build.
    Skipped,
    /// Not completed because the build was cancelled.
    Cancelled,
}

impl Outcome {
    /// Returns `true` if the unit has an artifact.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Outcome::CacheHitLocal | Outcome::CacheHitRemote | Outcome::Compiled
        )
    }

    /// Returns `true` for cache hits of either tier.
    pub fn is_cache_hit(self) -> bool {
        matches!(self, Outcome::CacheHitLocal | Outcome::CacheHitRemote)
    }

    /// Stable lowercase label, as used in JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::CacheHitLocal => "cache-hit-local",
            Outcome::CacheHitRemote => "cache-hit-remote",
            Outcome::Compiled => "compiled",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a successful unit's artifact lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    /// Cache key of the artifact.
    pub key: CacheKey,
    /// Payload size in bytes.
    pub size: u64,
}

/// The result of building one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    /// Unit name.
    pub name: String,
    /// What happened.
    pub outcome: Outcome,
    /// Wall time spent on the unit.
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Cache key, when one was derived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<CacheKey>,
    /// Artifact reference for successful units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    /// Cause of a failure, skip or cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Results of one build, keyed by unit name.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// When the build started.
    pub started_at: DateTime<Utc>,
    /// Total wall time.
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// One entry per unit.
    pub results: BTreeMap<String, BuildResult>,
}

impl BuildReport {
    /// Creates an empty report.
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            elapsed: Duration::ZERO,
            results: BTreeMap::new(),
        }
    }

    /// Records `result`, replacing any earlier entry for the same unit.
    pub fn insert(&mut self, result: BuildResult) {
        self.results.insert(result.name.clone(), result);
    }

    /// The result for `name`.
    pub fn get(&self, name: &str) -> Option<&BuildResult> {
        self.results.get(name)
    }

    /// The outcome for `name`.
    pub fn outcome(&self, name: &str) -> Option<Outcome> {
        self.get(name).map(|r| r.outcome)
    }

    /// Number of units in the report.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if the report is empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of units with the given outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results
            .values()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    /// Names of units with the given outcome, sorted.
    pub fn units_with(&self, outcome: Outcome) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.outcome == outcome)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Returns `true` if every unit has an artifact.
    pub fn is_success(&self) -> bool {
        self.results.values().all(|r| r.outcome.is_success())
    }

    /// Process exit code: 0 when every unit built, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    /// Writes the JSON report to `path`, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<(), BuildError> {
        let io_err = |source| BuildError::Report {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_json()).map_err(io_err)
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} units in {:.2}s: {} compiled, {} local hits, {} remote hits, {} failed, {} skipped, {} cancelled",
            self.len(),
            self.elapsed.as_secs_f64(),
            self.count(Outcome::Compiled),
            self.count(Outcome::CacheHitLocal),
            self.count(Outcome::CacheHitRemote),
            self.count(Outcome::Failed),
            self.count(Outcome::Skipped),
            self.count(Outcome::Cancelled),
        )?;
        for result in self.results.values().filter(|r| !r.outcome.is_success()) {
            write!(f, "  {:<9} {}", result.outcome.as_str(), result.name)?;
            if let Some(error) = &result.error {
                write!(f, ": {error}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
