//! On-disk, content-addressed artifact store.
//!
//! Artifacts live at `<cache_dir>/artifacts/<shard>/<key>.art`, where the
//! shard is the first byte of the key in hex. Files are written to a unique
//! temporary name and renamed into place, so a reader sees either nothing or
//! a complete file. All reads are verified; a corrupt entry is deleted and
//! reported so the caller can recompute it.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use aire_common::CacheKey;
use serde::Serialize;
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::error::CacheError;
use crate::eviction::LruIndex;
use crate::index::CacheIndex;

/// Subdirectory holding the artifact shards.
const ARTIFACTS_SUBDIR: &str = "artifacts";

/// File extension of stored artifacts.
const ARTIFACT_EXT: &str = "art";

/// File extension of in-progress writes.
const TMP_EXT: &str = "tmp";

/// Point-in-time counters of a [`LocalCacheStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Lookups that returned an artifact.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Artifacts written.
    pub puts: u64,
    /// Entries removed to stay within capacity.
    pub evictions: u64,
    /// Entries discarded because they failed verification.
    pub corruptions: u64,
    /// Entries currently stored.
    pub entries: u64,
    /// Bytes currently stored.
    pub total_bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    corruptions: AtomicU64,
}

/// Local artifact cache keyed by [`CacheKey`].
///
/// Safe to share between worker threads behind an `Arc`.
#[derive(Debug)]
pub struct LocalCacheStore {
    cache_dir: PathBuf,
    capacity: Option<u64>,
    lru: Mutex<LruIndex>,
    counters: Counters,
    tmp_seq: AtomicU64,
}

impl LocalCacheStore {
    /// Opens (creating if needed) the store rooted at `cache_dir`.
    ///
    /// The persisted recency index is reconciled with the files on disk:
    /// unknown files are adopted, index entries without a file are dropped,
    /// and leftover temporary files are deleted. `capacity` is a byte limit;
    /// `None` means unbounded.
    pub fn open(cache_dir: impl Into<PathBuf>, capacity: Option<u64>) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        let artifacts = cache_dir.join(ARTIFACTS_SUBDIR);
        std::fs::create_dir_all(&artifacts).map_err(|e| CacheError::Io {
            path: artifacts.clone(),
            source: e,
        })?;

        let mut on_disk = scan_artifacts(&artifacts)?;
        let mut lru = LruIndex::new();
        if let Some(index) = CacheIndex::load(&cache_dir) {
            for entry in index.entries {
                if let Some(size) = on_disk.remove(&entry.key) {
                    lru.insert(entry.key, size);
                }
            }
        }
        let mut adopted: Vec<(CacheKey, u64)> = on_disk.into_iter().collect();
        adopted.sort();
        for (key, size) in adopted {
            lru.insert(key, size);
        }

        let store = Self {
            cache_dir,
            capacity,
            lru: Mutex::new(lru),
            counters: Counters::default(),
            tmp_seq: AtomicU64::new(0),
        };
        {
            let mut lru = store.lock();
            store.evict_locked(&mut lru);
            debug!(
                dir = %store.cache_dir.display(),
                entries = lru.len(),
                bytes = lru.total_bytes(),
                "opened local cache"
            );
        }
        Ok(store)
    }

    /// Root directory of the store.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Configured byte capacity, if any.
    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    /// Path of the file holding `key`.
    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(ARTIFACTS_SUBDIR)
            .join(key.shard())
            .join(format!("{key}.{ARTIFACT_EXT}"))
    }

    /// Looks up `key`.
    ///
    /// Returns `Ok(None)` on a miss. A stored entry that fails verification
    /// is deleted and reported as [`CacheError::Corruption`].
    pub fn get(&self, key: &CacheKey) -> Result<Option<Artifact>, CacheError> {
        self.lock().pin(*key);
        let result = self.read_verified(key);
        let mut lru = self.lock();
        lru.unpin(key);

        match result {
            Ok(Some((artifact, size))) => {
                if !lru.touch(key) {
                    lru.insert(*key, size);
                }
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, size, "local cache hit");
                Ok(Some(artifact))
            }
            Ok(None) => {
                // A concurrent put may have landed since the read.
                if !self.artifact_path(key).is_file() {
                    lru.remove(key);
                }
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(%key, "local cache miss");
                Ok(None)
            }
            Err(err) if err.is_corruption() => {
                self.counters.corruptions.fetch_add(1, Ordering::Relaxed);
                lru.remove(key);
                let path = self.artifact_path(key);
                if let Err(e) = remove_file_if_exists(&path) {
                    warn!(%key, error = %e, "failed to delete corrupt cache entry");
                }
                warn!(%key, error = %err, "discarded corrupt cache entry");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Returns `true` if an entry for `key` exists. The entry is not verified.
    pub fn has(&self, key: &CacheKey) -> bool {
        self.artifact_path(key).is_file()
    }

    /// Stores `artifact` under `key`.
    ///
    /// Storing a key that is already present is a no-op apart from refreshing
    /// its recency. May evict older entries when a capacity is set.
    pub fn put(&self, key: &CacheKey, artifact: &Artifact) -> Result<(), CacheError> {
        if artifact.key() != *key {
            return Err(CacheError::KeyMismatch {
                expected: *key,
                actual: artifact.key(),
            });
        }

        let path = self.artifact_path(key);
        if path.is_file() {
            self.lock().touch(key);
            debug!(%key, "cache entry already present");
            return Ok(());
        }

        let encoded = artifact.encode()?;
        let size = encoded.len() as u64;
        let shard = path.parent().unwrap_or(&self.cache_dir).to_path_buf();
        std::fs::create_dir_all(&shard).map_err(|e| CacheError::Io {
            path: shard.clone(),
            source: e,
        })?;

        let tmp = shard.join(format!(
            "{key}.{}.{}.{TMP_EXT}",
            std::process::id(),
            self.tmp_seq.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, &encoded).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;

        // Renames happen under the lock so the first writer of a key wins.
        let mut lru = self.lock();
        if path.is_file() {
            let _ = std::fs::remove_file(&tmp);
            lru.touch(key);
            debug!(%key, "cache entry stored concurrently");
            return Ok(());
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(CacheError::Io { path, source: e });
        }

        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        debug!(%key, size, "stored artifact");
        lru.insert(*key, size);
        self.evict_locked(&mut lru);
        Ok(())
    }

    /// Deletes the entry for `key`. Returns `true` if one existed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut lru = self.lock();
        lru.remove(key);
        remove_file_if_exists(&self.artifact_path(key))
    }

    /// Deletes every entry whose key is not in `live`. Pinned entries are
    /// kept. Returns the number of entries removed.
    pub fn gc(&self, live: &HashSet<CacheKey>) -> Result<usize, CacheError> {
        let mut lru = self.lock();
        let doomed: Vec<CacheKey> = lru
            .snapshot()
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| !live.contains(key) && !lru.is_pinned(key))
            .collect();

        let mut removed = 0;
        for key in &doomed {
            lru.remove(key);
            if remove_file_if_exists(&self.artifact_path(key))? {
                removed += 1;
            }
        }
        debug!(removed, "cache garbage collection finished");
        Ok(removed)
    }

    /// Persists the recency index as `index.json`.
    pub fn save_index(&self) -> Result<(), CacheError> {
        let index = CacheIndex::from_snapshot(self.lock().snapshot());
        index.save(&self.cache_dir)
    }

    /// Current counters and occupancy.
    pub fn stats(&self) -> StoreStats {
        let lru = self.lock();
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            corruptions: self.counters.corruptions.load(Ordering::Relaxed),
            entries: lru.len() as u64,
            total_bytes: lru.total_bytes(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruIndex> {
        self.lru.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_verified(&self, key: &CacheKey) -> Result<Option<(Artifact, u64)>, CacheError> {
        let path = self.artifact_path(key);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        let size = raw.len() as u64;
        Artifact::decode(key, &raw).map(|artifact| Some((artifact, size)))
    }

    fn evict_locked(&self, lru: &mut LruIndex) {
        let Some(capacity) = self.capacity else {
            return;
        };
        for key in lru.evict_over(capacity) {
            match remove_file_if_exists(&self.artifact_path(&key)) {
                Ok(_) => {
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(%key, "evicted cache entry");
                }
                Err(e) => warn!(%key, error = %e, "failed to evict cache entry"),
            }
        }
    }
}

/// Lists stored artifacts with their file sizes, deleting stale temp files.
fn scan_artifacts(
    artifacts: &Path,
) -> Result<std::collections::HashMap<CacheKey, u64>, CacheError> {
    let io_err = |path: &Path, e: std::io::Error| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    let mut found = std::collections::HashMap::new();
    for shard in std::fs::read_dir(artifacts).map_err(|e| io_err(artifacts, e))? {
        let shard = shard.map_err(|e| io_err(artifacts, e))?.path();
        if !shard.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&shard).map_err(|e| io_err(&shard, e))? {
            let entry = entry.map_err(|e| io_err(&shard, e))?;
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(ARTIFACT_EXT) => {
                    let key = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|s| s.parse::<CacheKey>().ok());
                    let Some(key) = key else {
                        debug!(path = %path.display(), "ignoring unrecognized cache file");
                        continue;
                    };
                    let size = entry.metadata().map_err(|e| io_err(&path, e))?.len();
                    found.insert(key, size);
                }
                Some(TMP_EXT) => {
                    let _ = std::fs::remove_file(&path);
                }
                _ => {}
            }
        }
    }
    Ok(found)
}

fn remove_file_if_exists(path: &Path) -> Result<bool, CacheError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::CorruptionKind;
    use crate::index::INDEX_FILE;
    use aire_common::DIGEST_LEN;

    fn key(byte: u8) -> CacheKey {
        CacheKey::from_raw([byte; DIGEST_LEN])
    }

    fn open(dir: &Path) -> LocalCacheStore {
        LocalCacheStore::open(dir, None).unwrap()
    }

    /// Encoded size of an entry. Timestamps make it vary by a few bytes, so
    /// capacities in these tests leave half an entry of slack.
    fn encoded_size(payload_len: usize) -> u64 {
        Artifact::new(key(0), vec![0u8; payload_len])
            .encode()
            .unwrap()
            .len() as u64
    }

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let artifact = Artifact::new(key(1), &b"compiled"[..]);

        store.put(&key(1), &artifact).unwrap();
        assert!(store.has(&key(1)));
        let back = store.get(&key(1)).unwrap().unwrap();
        assert_eq!(back, artifact);

        let path = store.artifact_path(&key(1));
        assert!(path.ends_with(format!("artifacts/01/{}.art", key(1))));
    }

    #[test]
    fn get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        assert!(store.get(&key(9)).unwrap().is_none());
        assert!(!store.has(&key(9)));
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn put_existing_key_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let first = Artifact::new(key(1), &b"first"[..]);
        let second = Artifact::new(key(1), &b"second"[..]);

        store.put(&key(1), &first).unwrap();
        store.put(&key(1), &second).unwrap();
        assert_eq!(store.get(&key(1)).unwrap().unwrap().data(), first.data());
        assert_eq!(store.stats().puts, 1);
    }

    #[test]
    fn put_rejects_foreign_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let err = store
            .put(&key(1), &Artifact::new(key(2), &b"x"[..]))
            .unwrap_err();
        assert!(matches!(err, CacheError::KeyMismatch { .. }));
        assert!(!store.has(&key(1)));
    }

    #[test]
    fn corrupt_entry_is_reported_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store
            .put(&key(1), &Artifact::new(key(1), &b"payload"[..]))
            .unwrap();

        let path = store.artifact_path(&key(1));
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let err = store.get(&key(1)).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Corruption {
                kind: CorruptionKind::ChecksumMismatch { .. },
                ..
            }
        ));
        assert!(!store.has(&key(1)));
        assert_eq!(store.stats().corruptions, 1);

        store
            .put(&key(1), &Artifact::new(key(1), &b"payload"[..]))
            .unwrap();
        assert!(store.get(&key(1)).unwrap().is_some());
    }

    #[test]
    fn entry_under_wrong_name_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.put(&key(1), &Artifact::new(key(1), &b"a"[..])).unwrap();

        let dest = store.artifact_path(&key(2));
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::copy(store.artifact_path(&key(1)), &dest).unwrap();

        let err = store.get(&key(2)).unwrap_err();
        assert!(err.is_corruption());
        assert!(!dest.exists());
        assert!(store.has(&key(1)));
    }

    #[test]
    fn evicts_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let entry = encoded_size(64);
        let store = LocalCacheStore::open(dir.path(), Some(entry * 2 + entry / 2)).unwrap();

        store.put(&key(1), &Artifact::new(key(1), vec![1u8; 64])).unwrap();
        store.put(&key(2), &Artifact::new(key(2), vec![2u8; 64])).unwrap();
        store.get(&key(1)).unwrap();
        store.put(&key(3), &Artifact::new(key(3), vec![3u8; 64])).unwrap();

        assert!(store.has(&key(1)));
        assert!(!store.has(&key(2)));
        assert!(store.has(&key(3)));
        let stats = store.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 2);
        assert!(stats.total_bytes <= entry * 2 + entry / 2);
    }

    #[test]
    fn pinned_entry_is_not_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let entry = encoded_size(16);
        let store = LocalCacheStore::open(dir.path(), Some(entry + entry / 2)).unwrap();

        store.put(&key(1), &Artifact::new(key(1), vec![1u8; 16])).unwrap();
        store.lock().pin(key(1));
        store.put(&key(2), &Artifact::new(key(2), vec![2u8; 16])).unwrap();

        assert!(store.has(&key(1)));
        assert!(!store.has(&key(2)));
    }

    #[test]
    fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.put(&key(1), &Artifact::new(key(1), &b"a"[..])).unwrap();
        assert!(store.remove(&key(1)).unwrap());
        assert!(!store.remove(&key(1)).unwrap());
        assert!(store.get(&key(1)).unwrap().is_none());
        assert_eq!(store.stats().entries, 0);
    }

    #[test]
    fn gc_keeps_only_live_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        for b in 1..=3 {
            store.put(&key(b), &Artifact::new(key(b), vec![b; 4])).unwrap();
        }
        let live: HashSet<CacheKey> = [key(2)].into_iter().collect();
        assert_eq!(store.gc(&live).unwrap(), 2);
        assert!(!store.has(&key(1)));
        assert!(store.has(&key(2)));
        assert!(!store.has(&key(3)));
    }

    #[test]
    fn reopen_preserves_entries_and_recency() {
        let dir = tempfile::tempdir().unwrap();
        let entry = encoded_size(8);
        {
            let store = open(dir.path());
            store.put(&key(1), &Artifact::new(key(1), vec![1u8; 8])).unwrap();
            store.put(&key(2), &Artifact::new(key(2), vec![2u8; 8])).unwrap();
            store.get(&key(1)).unwrap();
            store.save_index().unwrap();
        }
        assert!(dir.path().join(INDEX_FILE).exists());

        let store = LocalCacheStore::open(dir.path(), Some(entry + entry / 2)).unwrap();
        assert!(store.has(&key(1)));
        assert!(!store.has(&key(2)));
    }

    #[test]
    fn open_adopts_files_missing_from_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(dir.path());
            store.put(&key(5), &Artifact::new(key(5), &b"x"[..])).unwrap();
        }
        let store = open(dir.path());
        assert_eq!(store.stats().entries, 1);
        assert!(store.get(&key(5)).unwrap().is_some());
    }

    #[test]
    fn open_removes_stale_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("artifacts").join("aa");
        std::fs::create_dir_all(&shard).unwrap();
        let stale = shard.join("partial.1.0.tmp");
        std::fs::write(&stale, b"half").unwrap();

        let store = open(dir.path());
        assert!(!stale.exists());
        assert_eq!(store.stats().entries, 0);
    }

    #[test]
    fn concurrent_puts_of_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .put(&key(1), &Artifact::new(key(1), &b"same"[..]))
                        .unwrap();
                    store.get(&key(1)).unwrap().unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(&handle.join().unwrap().data()[..], b"same");
        }
        let stats = store.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.puts, 1);
    }

    #[test]
    fn racing_miss_keeps_freshly_stored_entry() {
        for round in 0..50u8 {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(open(dir.path()));
            let readers: Vec<_> = (0..3)
                .map(|_| {
                    let store = Arc::clone(&store);
                    std::thread::spawn(move || {
                        for _ in 0..20 {
                            let _ = store.get(&key(round)).unwrap();
                        }
                    })
                })
                .collect();
            store
                .put(&key(round), &Artifact::new(key(round), &b"fresh"[..]))
                .unwrap();
            for reader in readers {
                reader.join().unwrap();
            }

            let on_disk = std::fs::metadata(store.artifact_path(&key(round)))
                .unwrap()
                .len();
            let stats = store.stats();
            assert_eq!(stats.entries, 1, "round {round}");
            assert_eq!(stats.total_bytes, on_disk, "round {round}");
        }
    }
}
