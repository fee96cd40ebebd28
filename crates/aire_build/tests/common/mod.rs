//! Shared fixtures: an in-memory recording compiler and scriptable remotes.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aire_build::{CompileError, Compiler, Orchestrator};
use aire_cache::{Artifact, LocalCacheStore};
use aire_common::{CacheKey, EnvFingerprint};
use aire_graph::BuildUnit;
use aire_remote::{RemoteBackend, RemoteCache, RemoteError, RetryPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Records every compile and produces deterministic bytes.
#[derive(Default)]
pub struct RecordingCompiler {
    compiled: Mutex<Vec<String>>,
    seen_deps: Mutex<HashMap<String, Vec<String>>>,
    failing: HashSet<String>,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
    cancel_on: Option<(String, CancellationToken)>,
}

impl RecordingCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    /// Cancels `token` while compiling `name`.
    pub fn cancelling(name: &str, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            cancel_on: Some((name.to_string(), token)),
            ..Default::default()
        })
    }

    /// Units compiled so far, in completion order.
    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().unwrap().clone()
    }

    pub fn compile_count(&self) -> usize {
        self.compiled.lock().unwrap().len()
    }

    /// Dependency names handed to the compiler for `name`.
    pub fn deps_seen(&self, name: &str) -> Option<Vec<String>> {
        self.seen_deps.lock().unwrap().get(name).cloned()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn output_for(unit: &BuildUnit) -> Bytes {
        let content = String::from_utf8_lossy(unit.content());
        Bytes::from(format!("beam({}:{content})", unit.name()))
    }
}

impl Compiler for RecordingCompiler {
    fn compile(
        &self,
        unit: &BuildUnit,
        deps: &BTreeMap<String, Artifact>,
    ) -> Result<Bytes, CompileError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some((name, token)) = &self.cancel_on {
            if name == unit.name() {
                token.cancel();
            }
        }

        self.seen_deps
            .lock()
            .unwrap()
            .insert(unit.name().to_string(), deps.keys().cloned().collect());
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(unit.name()) {
            return Err(CompileError::new(format!("{}: type error", unit.name())));
        }
        self.compiled.lock().unwrap().push(unit.name().to_string());
        Ok(Self::output_for(unit))
    }
}

/// An in-memory remote cache.
#[derive(Default)]
pub struct MemoryRemote {
    objects: Mutex<HashMap<CacheKey, Bytes>>,
    fetches: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn insert_raw(&self, key: CacheKey, bytes: Bytes) {
        self.objects.lock().unwrap().insert(key, bytes);
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.objects.lock().unwrap().keys().copied().collect()
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn fetch(&self, key: &CacheKey) -> Result<Option<Bytes>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn publish(&self, key: &CacheKey, data: Bytes) -> Result<(), RemoteError> {
        self.objects.lock().unwrap().insert(*key, data);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// A remote whose every request fails with a connection error.
#[derive(Default)]
pub struct UnreachableRemote {
    calls: AtomicUsize,
}

impl UnreachableRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteBackend for UnreachableRemote {
    async fn fetch(&self, _key: &CacheKey) -> Result<Option<Bytes>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::Transport {
            backend: "unreachable".into(),
            reason: "connection refused".into(),
        })
    }

    async fn publish(&self, _key: &CacheKey, _data: Bytes) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::Transport {
            backend: "unreachable".into(),
            reason: "connection refused".into(),
        })
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}

pub fn env() -> EnvFingerprint {
    EnvFingerprint::new("OTP-27", "0.1.0")
}

pub fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
        ..Default::default()
    }
}

pub fn remote_cache(backend: Arc<dyn RemoteBackend>) -> Arc<RemoteCache> {
    Arc::new(RemoteCache::new(
        backend,
        fast_retries(1),
        Duration::from_millis(500),
    ))
}

pub fn orchestrator(
    cache_dir: &Path,
    compiler: Arc<dyn Compiler>,
    remote: Arc<RemoteCache>,
    workers: usize,
) -> Orchestrator {
    let store = LocalCacheStore::open(cache_dir, None).unwrap();
    Orchestrator::new(compiler, Arc::new(store), remote, env(), workers)
}

pub fn local_only(cache_dir: &Path, compiler: Arc<dyn Compiler>) -> Orchestrator {
    orchestrator(cache_dir, compiler, Arc::new(RemoteCache::disabled()), 4)
}

pub fn unit(name: &str, content: &str, deps: &[&str]) -> BuildUnit {
    BuildUnit::new(name, content.to_string(), deps.iter().copied())
}

/// `lib.log`, `lib.net -> lib.log`, `app -> lib.net, lib.log`.
pub fn sample_units() -> Vec<BuildUnit> {
    vec![
        unit("app", "module app", &["lib.net", "lib.log"]),
        unit("lib.log", "module log", &[]),
        unit("lib.net", "module net", &["lib.log"]),
    ]
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Collects formatted log output for the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Installs a debug-level subscriber writing into this capture until the
    /// returned guard is dropped.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Lines containing `needle`.
    pub fn lines_with(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
