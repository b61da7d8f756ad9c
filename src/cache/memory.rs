//! Memory Tier - Process-Local Hot Cache
//!
//! Fastest tier. Nothing survives a restart.
//!
//! # Design
//!
//! - Single `parking_lot::Mutex` around an [`LruMap`]; lookups and inserts
//!   never suspend
//! - Byte budget enforced on insert: least-recently-used entries are evicted
//!   until the new entry fits
//! - Concurrent writes to one key are last-call-wins

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::entry::CacheEntry;
use super::lru::LruMap;
use super::DEFAULT_MEMORY_BUDGET;
use crate::domain::{Tier, TierStore};
use crate::error::{Error, Result};

/// Memory tier configuration
#[derive(Debug, Clone)]
pub struct MemoryTierConfig {
    /// Maximum total entry size in bytes
    pub budget_bytes: u64,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_MEMORY_BUDGET,
        }
    }
}

/// Outcome of an insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Whether the entry was stored (false if it exceeds the whole budget)
    pub stored: bool,
    /// Keys evicted to make room
    pub evicted: Vec<String>,
}

/// Memory tier - process-wide hot cache
pub struct MemoryTier {
    entries: Mutex<LruMap>,
    config: MemoryTierConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryTier {
    /// Create a new memory tier with default configuration
    pub fn new() -> Self {
        Self::with_config(MemoryTierConfig::default())
    }

    /// Create a new memory tier with custom configuration
    pub fn with_config(config: MemoryTierConfig) -> Self {
        Self {
            entries: Mutex::new(LruMap::new()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create with a byte budget
    pub fn with_budget(budget_bytes: u64) -> Self {
        Self::with_config(MemoryTierConfig { budget_bytes })
    }

    /// Get an entry, marking it as recently used
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let found = self.entries.lock().get(key).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Insert an entry, evicting least-recently-used entries if needed
    pub fn insert(&self, entry: CacheEntry) -> InsertOutcome {
        let size = entry.size_bytes;
        let budget = self.config.budget_bytes;
        if size > budget {
            return InsertOutcome::default();
        }

        let mut entries = self.entries.lock();
        entries.take(&entry.key);
        let evicted: Vec<String> = entries
            .evict_to(budget - size)
            .into_iter()
            .map(|e| e.key)
            .collect();
        entries.insert(entry.in_tier(Tier::Memory));
        drop(entries);

        self.evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        InsertOutcome {
            stored: true,
            evicted,
        }
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().take(key)
    }

    /// Check if the tier contains a key
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    /// Keys starting with `prefix`
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries.lock().keys_with_prefix(prefix)
    }

    /// Get current size in bytes
    pub fn size(&self) -> u64 {
        self.entries.lock().size()
    }

    /// Get configured budget
    pub fn budget(&self) -> u64 {
        self.config.budget_bytes
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get utilization (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        self.size() as f64 / self.budget() as f64
    }

    /// Clear the tier
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TierStore for MemoryTier {
    fn tier(&self) -> Tier {
        Tier::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.get_entry(key))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let needed = entry.size_bytes;
        if self.insert(entry).stored {
            Ok(())
        } else {
            Err(Error::QuotaExceeded {
                tier: Tier::Memory.to_string(),
                needed,
                available: self.config.budget_bytes,
            })
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.keys_with_prefix(prefix))
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().peek(key).cloned())
    }

    async fn evict_lru(&self, bytes_needed: u64) -> Result<Vec<String>> {
        let target = self.config.budget_bytes.saturating_sub(bytes_needed);
        let evicted: Vec<String> = self
            .entries
            .lock()
            .evict_to(target)
            .into_iter()
            .map(|e| e.key)
            .collect();
        self.evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        Ok(evicted)
    }
}

// =============================================================================
// Tests
// =============================================================================
