//! Recency-Tracked Entry Map
//!
//! Bookkeeping shared by the capacity-bounded tiers: entries keyed by cache
//! key, a running byte total and a logical clock for least-recently-used
//! ordering. Callers provide their own locking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::entry::{is_reserved_key, CacheEntry};

struct Slot {
    entry: CacheEntry,
    last_access: u64,
}

/// Map of entries with byte accounting and LRU ordering
#[derive(Default)]
pub(crate) struct LruMap {
    map: HashMap<String, Slot>,
    size: u64,
    clock: u64,
}

impl LruMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Get an entry and mark it as recently used
    pub(crate) fn get(&mut self, key: &str) -> Option<&CacheEntry> {
        let now = self.tick();
        let slot = self.map.get_mut(key)?;
        slot.last_access = now;
        Some(&slot.entry)
    }

    /// Get an entry without touching recency
    pub(crate) fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.map.get(key).map(|slot| &slot.entry)
    }

    /// Insert or replace an entry, returning the previous one
    pub(crate) fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let previous = self.take(&entry.key);
        let now = self.tick();
        self.size += entry.size_bytes;
        self.map.insert(
            entry.key.clone(),
            Slot {
                entry,
                last_access: now,
            },
        );
        previous
    }

    /// Remove an entry
    pub(crate) fn take(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.map.remove(key)?;
        self.size -= slot.entry.size_bytes;
        Some(slot.entry)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Total bytes held
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Keys starting with `prefix` whose entry was written after `since`
    pub(crate) fn keys_written_after(&self, prefix: &str, since: DateTime<Utc>) -> Vec<String> {
        self.map
            .iter()
            .filter(|(k, slot)| k.starts_with(prefix) && slot.entry.created_at > since)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Evictable keys, least recently used first (reserved keys excluded)
    pub(crate) fn lru_keys(&self) -> Vec<String> {
        let mut candidates: Vec<(&String, u64)> = self
            .map
            .iter()
            .filter(|(k, _)| !is_reserved_key(k))
            .map(|(k, slot)| (k, slot.last_access))
            .collect();
        candidates.sort_by_key(|(_, last_access)| *last_access);
        candidates.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// Evict least-recently-used entries until `size <= target`
    pub(crate) fn evict_to(&mut self, target: u64) -> Vec<CacheEntry> {
        let mut evicted = Vec::new();
        for key in self.lru_keys() {
            if self.size <= target {
                break;
            }
            if let Some(entry) = self.take(&key) {
                evicted.push(entry);
            }
        }
        evicted
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.size = 0;
    }
}
