//! Incremental build scheduling over the dependency graph.
//!
//! Units are released in topological order as soon as all of their
//! dependencies have finished. Each released unit derives its cache key, then
//! tries the local store, then the remote cache, and compiles only on a full
//! miss. A failed unit poisons its transitive dependents, which are reported
//! as skipped, while independent units keep building.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aire_cache::{Artifact, ContentHasher, LocalCacheStore};
use aire_common::{CacheKey, EnvFingerprint};
use aire_config::{resolve_config, BuildConfig};
use aire_graph::{BuildUnit, DependencyGraph};
use aire_remote::{RemoteCache, RemoteError};
use bytes::Bytes;
use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compiler::Compiler;
use crate::error::BuildError;
use crate::report::{ArtifactRef, BuildReport, BuildResult, Outcome};

/// Drives builds against a local store and a remote cache.
pub struct Orchestrator {
    compiler: Arc<dyn Compiler>,
    store: Arc<LocalCacheStore>,
    remote: Arc<RemoteCache>,
    env: EnvFingerprint,
    worker_count: usize,
    publishes: Mutex<JoinSet<()>>,
}

/// Everything a unit task needs, shared across tasks.
struct UnitContext {
    compiler: Arc<dyn Compiler>,
    store: Arc<LocalCacheStore>,
    remote: Arc<RemoteCache>,
}

/// A unit task's result, before it is turned into a [`BuildResult`].
struct UnitDone {
    name: String,
    key: CacheKey,
    outcome: Outcome,
    artifact: Option<Artifact>,
    error: Option<String>,
    duration: Duration,
}

impl Orchestrator {
    /// Creates an orchestrator. `worker_count` is clamped to at least 1.
    pub fn new(
        compiler: Arc<dyn Compiler>,
        store: Arc<LocalCacheStore>,
        remote: Arc<RemoteCache>,
        env: EnvFingerprint,
        worker_count: usize,
    ) -> Self {
        Self {
            compiler,
            store,
            remote,
            env,
            worker_count: worker_count.max(1),
            publishes: Mutex::new(JoinSet::new()),
        }
    }

    /// Wires an orchestrator from a loaded `aire.toml`.
    ///
    /// Relative cache directories are resolved against `project_dir`.
    pub fn from_config(
        config: &BuildConfig,
        project_dir: &Path,
        compiler: Arc<dyn Compiler>,
    ) -> Result<Self, BuildError> {
        let resolved = resolve_config(config, project_dir);
        let store = LocalCacheStore::open(&resolved.cache_directory, resolved.cache_capacity_bytes)?;
        let remote = RemoteCache::from_config(&resolved.remote)?;
        info!(
            cache_dir = %resolved.cache_directory.display(),
            remote = remote.name(),
            workers = resolved.worker_count,
            "build orchestrator ready"
        );
        Ok(Self::new(
            compiler,
            Arc::new(store),
            Arc::new(remote),
            resolved.env,
            resolved.worker_count,
        ))
    }

    /// The local store.
    pub fn store(&self) -> &Arc<LocalCacheStore> {
        &self.store
    }

    /// The remote cache client.
    pub fn remote(&self) -> &Arc<RemoteCache> {
        &self.remote
    }

    /// The environment fingerprint folded into every key.
    pub fn env(&self) -> &EnvFingerprint {
        &self.env
    }

    /// Maximum number of units in flight.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Builds `units`.
    ///
    /// Graph problems (cycles, unknown dependencies, duplicate names) are
    /// returned as errors before anything is compiled. Otherwise every unit
    /// gets an entry in the report. When `cancel` fires, units already in
    /// flight finish and the rest are reported as cancelled.
    pub async fn build(
        &self,
        units: Vec<BuildUnit>,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        let mut report = BuildReport::new(Utc::now());

        let graph = DependencyGraph::from_units(units)?;
        let order = graph.topological_order()?;
        info!(units = order.len(), workers = self.worker_count, "starting build");

        self.remote.reset_for_build();
        let ctx = Arc::new(UnitContext {
            compiler: Arc::clone(&self.compiler),
            store: Arc::clone(&self.store),
            remote: Arc::clone(&self.remote),
        });

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(pos, name)| (name.as_str(), pos))
            .collect();
        let mut pending: HashMap<&str, usize> = order
            .iter()
            .map(|name| (name.as_str(), distinct_dependencies(&graph, name).len()))
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> = order
            .iter()
            .enumerate()
            .filter(|(_, name)| pending[name.as_str()] == 0)
            .map(|(pos, _)| Reverse(pos))
            .collect();

        let mut keys: HashMap<String, CacheKey> = HashMap::new();
        let mut artifacts: HashMap<String, Artifact> = HashMap::new();
        let mut poisoned: HashMap<String, String> = HashMap::new();
        let mut in_flight: JoinSet<UnitDone> = JoinSet::new();

        loop {
            while in_flight.len() < self.worker_count && !cancel.is_cancelled() {
                let Some(Reverse(pos)) = ready.pop() else {
                    break;
                };
                let name = order[pos].as_str();
                let deps = distinct_dependencies(&graph, name);

                if let Some(reason) = poisoned.get(name).cloned() {
                    debug!(unit = name, reason = %reason, "skipping unit");
                    report.insert(BuildResult {
                        name: name.to_string(),
                        outcome: Outcome::Skipped,
                        duration: Duration::ZERO,
                        key: None,
                        artifact: None,
                        error: Some(reason),
                    });
                    release_dependents(&graph, name, &position, &mut pending, &mut ready);
                    continue;
                }

                let Some(unit) = graph.unit(name).cloned() else {
                    continue;
                };
                let dep_keys: Vec<(&str, CacheKey)> = deps
                    .iter()
                    .filter_map(|dep| keys.get(*dep).map(|key| (*dep, *key)))
                    .collect();
                let key = ContentHasher::derive_cache_key(&unit, &dep_keys, &self.env);
                keys.insert(name.to_string(), key);
                let dep_artifacts: BTreeMap<String, Artifact> = deps
                    .iter()
                    .filter_map(|dep| artifacts.get(*dep).map(|a| (dep.to_string(), a.clone())))
                    .collect();

                debug!(unit = name, %key, "releasing unit");
                in_flight.spawn(process_unit(
                    Arc::clone(&ctx),
                    unit,
                    key,
                    dep_artifacts,
                    cancel.clone(),
                ));
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let done = joined.map_err(|e| BuildError::Task(e.to_string()))?;

            let artifact = done.artifact.as_ref().map(|a| ArtifactRef {
                key: a.key(),
                size: a.size(),
            });
            if done.outcome == Outcome::Compiled {
                if let Some(artifact) = &done.artifact {
                    self.spawn_publish(artifact.clone(), cancel.clone());
                }
            }
            match &done.artifact {
                Some(a) if done.outcome.is_success() => {
                    artifacts.insert(done.name.clone(), a.clone());
                }
                _ => {
                    let cause = match done.outcome {
                        Outcome::Failed => format!("dependency `{}` failed", done.name),
                        _ => format!("dependency `{}` was {}", done.name, done.outcome),
                    };
                    // The first failure upstream of a unit is its recorded cause.
                    for dependent in graph.transitive_dependents(&done.name) {
                        poisoned
                            .entry(dependent.to_string())
                            .or_insert_with(|| cause.clone());
                    }
                }
            }

            report.insert(BuildResult {
                name: done.name.clone(),
                outcome: done.outcome,
                duration: done.duration,
                key: Some(done.key),
                artifact,
                error: done.error,
            });
            release_dependents(&graph, &done.name, &position, &mut pending, &mut ready);
        }

        for name in &order {
            if report.get(name).is_none() {
                report.insert(BuildResult {
                    name: name.clone(),
                    outcome: Outcome::Cancelled,
                    duration: Duration::ZERO,
                    key: keys.get(name).copied(),
                    artifact: None,
                    error: Some("build cancelled".to_string()),
                });
            }
        }

        if let Err(e) = self.store.save_index() {
            warn!(error = %e, "failed to save cache index");
        }

        report.elapsed = started.elapsed();
        info!(
            units = report.len(),
            compiled = report.count(Outcome::Compiled),
            local_hits = report.count(Outcome::CacheHitLocal),
            remote_hits = report.count(Outcome::CacheHitRemote),
            failed = report.count(Outcome::Failed),
            skipped = report.count(Outcome::Skipped),
            cancelled = report.count(Outcome::Cancelled),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "build finished"
        );
        Ok(report)
    }

    /// Waits for every background publish started so far.
    pub async fn wait_for_publishes(&self) {
        let mut publishes = {
            let mut guard = self
                .publishes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        while let Some(joined) = publishes.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "publish task failed");
            }
        }
    }

    /// Number of background publish tasks still tracked.
    ///
    /// Finished tasks are released whenever a new publish starts, so this
    /// stays bounded across repeated builds.
    pub fn tracked_publishes(&self) -> usize {
        self.publishes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn spawn_publish(&self, artifact: Artifact, cancel: CancellationToken) {
        if !self.remote.is_enabled() {
            return;
        }
        let remote = Arc::clone(&self.remote);
        let mut publishes = self
            .publishes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while let Some(finished) = publishes.try_join_next() {
            if let Err(e) = finished {
                warn!(error = %e, "publish task failed");
            }
        }
        publishes.spawn(async move {
            let key = artifact.key();
            let encoded = match artifact.encode() {
                Ok(encoded) => Bytes::from(encoded),
                Err(e) => {
                    warn!(%key, error = %e, "cannot encode artifact for publishing");
                    return;
                }
            };
            // Failures are logged and counted by the client.
            let _ = remote.publish(&key, encoded, &cancel).await;
        });
    }
}

/// Looks up, fetches or compiles one unit.
async fn process_unit(
    ctx: Arc<UnitContext>,
    unit: BuildUnit,
    key: CacheKey,
    deps: BTreeMap<String, Artifact>,
    cancel: CancellationToken,
) -> UnitDone {
    let started = Instant::now();
    let name = unit.name().to_string();
    let done = |outcome, artifact, error| UnitDone {
        name: name.clone(),
        key,
        outcome,
        artifact,
        error,
        duration: started.elapsed(),
    };

    if let Some(artifact) = lookup_local(&ctx.store, key).await {
        return done(Outcome::CacheHitLocal, Some(artifact), None);
    }

    match ctx.remote.fetch(&key, &cancel).await {
        Ok(Some(bytes)) => match Artifact::decode(&key, &bytes) {
            Ok(artifact) => {
                store_local(&ctx.store, key, artifact.clone()).await;
                return done(Outcome::CacheHitRemote, Some(artifact), None);
            }
            Err(e) => warn!(unit = %name, %key, error = %e, "discarding invalid remote artifact"),
        },
        Ok(None) => {}
        Err(RemoteError::Cancelled) => {
            return done(Outcome::Cancelled, None, Some("build cancelled".to_string()));
        }
        Err(e) => debug!(unit = %name, %key, error = %e, "remote lookup failed"),
    }

    debug!(unit = %name, %key, "compiling");
    let compiler = Arc::clone(&ctx.compiler);
    let compiled = tokio::task::spawn_blocking(move || compiler.compile(&unit, &deps)).await;
    match compiled {
        Ok(Ok(bytes)) => {
            let artifact = Artifact::new(key, bytes);
            store_local(&ctx.store, key, artifact.clone()).await;
            done(Outcome::Compiled, Some(artifact), None)
        }
        Ok(Err(e)) => {
            warn!(unit = %name, error = %e, "compile failed");
            done(Outcome::Failed, None, Some(e.message))
        }
        Err(e) => {
            warn!(unit = %name, error = %e, "compiler panicked");
            done(Outcome::Failed, None, Some(format!("compiler panicked: {e}")))
        }
    }
}

/// Local lookup; every failure is a miss.
async fn lookup_local(store: &Arc<LocalCacheStore>, key: CacheKey) -> Option<Artifact> {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.get(&key)).await {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            // Corrupt entries were already deleted and logged by the store.
            debug!(%key, error = %e, "local lookup failed, treating as miss");
            None
        }
        Err(e) => {
            warn!(%key, error = %e, "local lookup task failed");
            None
        }
    }
}

async fn store_local(store: &Arc<LocalCacheStore>, key: CacheKey, artifact: Artifact) {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.put(&key, &artifact)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%key, error = %e, "failed to write local cache"),
        Err(e) => warn!(%key, error = %e, "local cache write task failed"),
    }
}

/// Direct dependencies of `name` with duplicates removed, in declaration order.
fn distinct_dependencies<'g>(graph: &'g DependencyGraph, name: &str) -> Vec<&'g str> {
    let mut seen = HashSet::new();
    graph
        .dependencies(name)
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .filter(|dep| seen.insert(*dep))
        .collect()
}

/// Marks `name` finished for each dependent, queueing those with nothing left
/// to wait for.
fn release_dependents(
    graph: &DependencyGraph,
    name: &str,
    position: &HashMap<&str, usize>,
    pending: &mut HashMap<&str, usize>,
    ready: &mut BinaryHeap<Reverse<usize>>,
) {
    for dependent in graph.dependents(name) {
        let Some(&pos) = position.get(dependent) else {
            continue;
        };
        if let Some(count) = pending.get_mut(dependent) {
            *count -= 1;
            if *count == 0 {
                ready.push(Reverse(pos));
            }
        }
    }
}
