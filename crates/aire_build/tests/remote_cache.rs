//! Builds sharing artifacts through a remote cache.

mod common;

use std::sync::Arc;
use std::time::Duration;

use aire_build::Outcome;
use aire_cache::Artifact;
use bytes::Bytes;
use common::*;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn published_artifacts_serve_a_fresh_machine() {
    init_tracing();
    let remote = MemoryRemote::new();

    let first_dir = tempfile::tempdir().unwrap();
    let first = orchestrator(
        first_dir.path(),
        RecordingCompiler::new(),
        remote_cache(remote.clone()),
        2,
    );
    first
        .build(sample_units(), &CancellationToken::new())
        .await
        .unwrap();
    first.wait_for_publishes().await;
    assert_eq!(remote.len(), 3);

    let second_dir = tempfile::tempdir().unwrap();
    let compiler = RecordingCompiler::new();
    let second = orchestrator(
        second_dir.path(),
        compiler.clone(),
        remote_cache(remote.clone()),
        2,
    );
    let report = second
        .build(sample_units(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(compiler.compile_count(), 0);
    assert_eq!(report.count(Outcome::CacheHitRemote), 3);
    assert_eq!(second.remote().stats().hits, 3);

    // Remote hits were written through to the local store.
    let report = second
        .build(sample_units(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.count(Outcome::CacheHitLocal), 3);
}

#[tokio::test]
async fn local_hit_does_not_consult_remote() {
    let remote = MemoryRemote::new();
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        RecordingCompiler::new(),
        remote_cache(remote.clone()),
        2,
    );
    orch.build(sample_units(), &CancellationToken::new())
        .await
        .unwrap();
    let fetches = remote.fetches();

    orch.build(sample_units(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(remote.fetches(), fetches);
}

#[tokio::test]
async fn unreachable_remote_still_builds_everything() {
    let logs = LogCapture::default();
    let _guard = logs.install();
    let backend = UnreachableRemote::new();
    let dir = tempfile::tempdir().unwrap();
    let compiler = RecordingCompiler::new();
    let remote = remote_cache(backend.clone());
    let orch = orchestrator(dir.path(), compiler.clone(), remote.clone(), 1);

    let report = orch
        .build(sample_units(), &CancellationToken::new())
        .await
        .unwrap();
    orch.wait_for_publishes().await;

    assert_eq!(report.count(Outcome::Compiled), 3);
    assert_eq!(report.exit_code(), 0);
    assert!(remote.is_degraded());

    // The first fetch used up its retries; everything after was skipped.
    assert_eq!(backend.calls(), 2);
    let stats = remote.stats();
    assert_eq!(stats.failures, 1);
    assert!(stats.degraded_skips >= 2);

    let warnings = logs.lines_with("RemoteCacheUnavailable");
    assert_eq!(warnings.len(), 1, "{}", logs.contents());
    assert!(warnings[0].contains("WARN"));
    let skipped = logs.lines_with("remote degraded, skipping");
    assert_eq!(skipped.len() as u64, stats.degraded_skips);
}

#[tokio::test]
async fn degraded_state_resets_between_builds() {
    let backend = UnreachableRemote::new();
    let dir = tempfile::tempdir().unwrap();
    let remote = remote_cache(backend.clone());
    let orch = orchestrator(dir.path(), RecordingCompiler::new(), remote.clone(), 1);

    orch.build(vec![unit("a", "a", &[])], &CancellationToken::new())
        .await
        .unwrap();
    let after_first = backend.calls();

    orch.build(vec![unit("b", "b", &[])], &CancellationToken::new())
        .await
        .unwrap();
    assert!(backend.calls() > after_first);
}

#[tokio::test]
async fn corrupt_remote_artifact_is_ignored() {
    let remote = MemoryRemote::new();
    let units = vec![unit("solo", "module solo", &[])];
    let key = aire_cache::ContentHasher::derive_cache_key(&units[0], &[], &env());
    remote.insert_raw(key, Bytes::from_static(b"not an artifact"));

    let dir = tempfile::tempdir().unwrap();
    let compiler = RecordingCompiler::new();
    let orch = orchestrator(dir.path(), compiler.clone(), remote_cache(remote.clone()), 1);
    let report = orch.build(units, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome("solo"), Some(Outcome::Compiled));
    assert_eq!(compiler.compiled(), vec!["solo"]);
}

#[tokio::test]
async fn remote_artifact_for_another_key_is_rejected() {
    let remote = MemoryRemote::new();
    let solo = unit("solo", "module solo", &[]);
    let other = unit("other", "module other", &[]);
    let solo_key = aire_cache::ContentHasher::derive_cache_key(&solo, &[], &env());
    let other_key = aire_cache::ContentHasher::derive_cache_key(&other, &[], &env());
    let foreign = Artifact::new(other_key, &b"other bytes"[..]).encode().unwrap();
    remote.insert_raw(solo_key, Bytes::from(foreign));

    let dir = tempfile::tempdir().unwrap();
    let compiler = RecordingCompiler::new();
    let orch = orchestrator(dir.path(), compiler.clone(), remote_cache(remote.clone()), 1);
    let report = orch.build(vec![solo], &CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome("solo"), Some(Outcome::Compiled));
}

#[tokio::test]
async fn publishing_does_not_block_the_report() {
    let remote = MemoryRemote::new();
    let dir = tempfile::tempdir().unwrap();
    let orch = Arc::new(orchestrator(
        dir.path(),
        RecordingCompiler::new(),
        remote_cache(remote.clone()),
        2,
    ));

    let report = orch
        .build(sample_units(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.count(Outcome::Compiled), 3);

    orch.wait_for_publishes().await;
    let stats = orch.remote().stats();
    assert_eq!(stats.publishes, 3);
    assert_eq!(stats.publish_failures, 0);
    assert_eq!(remote.keys().len(), 3);
}

#[tokio::test]
async fn finished_publishes_are_released_across_builds() {
    let remote = MemoryRemote::new();
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        RecordingCompiler::new(),
        remote_cache(remote.clone()),
        1,
    );

    for i in 0..30 {
        let name = format!("unit{i}");
        orch.build(
            vec![unit(&name, &format!("module {name}"), &[])],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        // Let the publish for this build run to completion.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(orch.tracked_publishes() <= 1, "{}", orch.tracked_publishes());

    orch.wait_for_publishes().await;
    assert_eq!(orch.tracked_publishes(), 0);
    assert_eq!(remote.len(), 30);
    assert_eq!(orch.remote().stats().publishes, 30);
}
