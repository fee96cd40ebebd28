//! Least-recently-used bookkeeping for the local store.
//!
//! Recency is a monotonically increasing tick; the oldest tick is the next
//! eviction candidate. Pinned entries are skipped by eviction.

use std::collections::{BTreeMap, HashMap};

use aire_common::CacheKey;

#[derive(Debug, Clone, Copy)]
struct EntryMeta {
    size: u64,
    tick: u64,
}

/// Recency order, sizes and pin counts of stored entries.
#[derive(Debug, Default)]
pub struct LruIndex {
    entries: HashMap<CacheKey, EntryMeta>,
    order: BTreeMap<u64, CacheKey>,
    pins: HashMap<CacheKey, usize>,
    next_tick: u64,
    total_bytes: u64,
}

impl LruIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size of tracked entries in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Returns `true` if `key` is tracked.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Tracks `key` as the most recently used entry. Re-inserting an existing
    /// key updates its size.
    pub fn insert(&mut self, key: CacheKey, size: u64) {
        if let Some(old) = self.entries.remove(&key) {
            self.order.remove(&old.tick);
            self.total_bytes -= old.size;
        }
        let tick = self.bump();
        self.entries.insert(key, EntryMeta { size, tick });
        self.order.insert(tick, key);
        self.total_bytes += size;
    }

    /// Marks `key` as most recently used. Returns `false` if it is untracked.
    pub fn touch(&mut self, key: &CacheKey) -> bool {
        let Some(old_tick) = self.entries.get(key).map(|m| m.tick) else {
            return false;
        };
        let tick = self.bump();
        self.order.remove(&old_tick);
        self.order.insert(tick, *key);
        if let Some(meta) = self.entries.get_mut(key) {
            meta.tick = tick;
        }
        true
    }

    /// Stops tracking `key`, returning its size.
    pub fn remove(&mut self, key: &CacheKey) -> Option<u64> {
        let meta = self.entries.remove(key)?;
        self.order.remove(&meta.tick);
        self.total_bytes -= meta.size;
        Some(meta.size)
    }

    /// Protects `key` from eviction until a matching [`unpin`](Self::unpin).
    pub fn pin(&mut self, key: CacheKey) {
        *self.pins.entry(key).or_insert(0) += 1;
    }

    /// Releases one pin on `key`.
    pub fn unpin(&mut self, key: &CacheKey) {
        if let Some(count) = self.pins.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(key);
            }
        }
    }

    /// Returns `true` if `key` has at least one outstanding pin.
    pub fn is_pinned(&self, key: &CacheKey) -> bool {
        self.pins.contains_key(key)
    }

    /// Removes least-recently-used, unpinned entries until the total size is
    /// at most `capacity`. Returns the removed keys, oldest first.
    ///
    /// Stops early if only pinned entries remain.
    pub fn evict_over(&mut self, capacity: u64) -> Vec<CacheKey> {
        let mut victims = Vec::new();
        if self.total_bytes <= capacity {
            return victims;
        }

        let mut excess = self.total_bytes - capacity;
        for key in self.order.values() {
            if excess == 0 {
                break;
            }
            if self.pins.contains_key(key) {
                continue;
            }
            let size = self.entries[key].size;
            victims.push(*key);
            excess = excess.saturating_sub(size);
        }

        for key in &victims {
            self.remove(key);
        }
        victims
    }

    /// Entries with their sizes, least recently used first.
    pub fn snapshot(&self) -> Vec<(CacheKey, u64)> {
        self.order
            .values()
            .map(|key| (*key, self.entries[key].size))
            .collect()
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }
}
