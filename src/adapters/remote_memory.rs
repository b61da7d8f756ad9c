//! In-Memory Remote Tier
//!
//! DashMap-backed stand-in for the per-user remote store, used by tests and
//! offline demos. Supports fault injection so retry, quota and auth paths can
//! be exercised without a server.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::cache::CacheEntry;
use crate::domain::{Tier, TierStore};
use crate::error::{Error, Result};

/// In-memory remote store
#[derive(Default)]
pub struct InMemoryRemoteStore {
    /// Stored entries by key
    entries: DashMap<String, CacheEntry>,
    /// Keys whose writes always fail with a network error
    failing_keys: RwLock<HashSet<String>>,
    /// Reject every operation as unauthenticated
    auth_failure: AtomicBool,
    /// Fail reads and listings with a network error
    read_failure: AtomicBool,
    /// Number of upcoming writes that fail with a network error
    transient_failures: AtomicU32,
    /// Artificial per-operation latency in milliseconds
    latency_ms: AtomicU64,
    /// Successful writes
    uploads: AtomicU64,
    /// Write attempts, including failed ones
    write_attempts: AtomicU64,
    /// Single-entry reads
    reads: AtomicU64,
}

impl InMemoryRemoteStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Make every write of `key` fail with a network error
    pub fn fail_key(&self, key: impl Into<String>) {
        self.failing_keys.write().insert(key.into());
    }

    /// Stop failing writes for every key
    pub fn clear_failing_keys(&self) {
        self.failing_keys.write().clear();
    }

    /// Toggle rejecting the session on every operation
    pub fn set_auth_failure(&self, enabled: bool) {
        self.auth_failure.store(enabled, Ordering::SeqCst);
    }

    /// Toggle network failures on reads and listings
    pub fn fail_reads(&self, enabled: bool) {
        self.read_failure.store(enabled, Ordering::SeqCst);
    }

    /// Fail the next `count` writes with a network error
    pub fn fail_next_writes(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Store an entry directly, bypassing faults and counters
    pub fn seed(&self, entry: CacheEntry) {
        self.entries
            .insert(entry.key.clone(), entry.in_tier(Tier::Remote));
    }

    /// Read an entry directly, bypassing faults
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Number of successful writes
    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Number of write attempts
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.load(Ordering::Relaxed)
    }

    /// Number of single-entry reads
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn simulate(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.auth_failure.load(Ordering::SeqCst) {
            return Err(Error::Auth("session expired".into()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        if self.read_failure.load(Ordering::SeqCst) {
            return Err(Error::Network("remote unreachable".into()));
        }
        Ok(())
    }

    fn check_write(&self, key: &str) -> Result<()> {
        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(Error::Network("connection reset".into()));
        }
        if self.failing_keys.read().contains(key) {
            return Err(Error::Network(format!("upload of {} rejected", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl TierStore for InMemoryRemoteStore {
    fn tier(&self) -> Tier {
        Tier::Remote
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.simulate().await?;
        self.check_read()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.peek(key))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        self.simulate().await?;
        self.write_attempts.fetch_add(1, Ordering::Relaxed);
        self.check_write(&entry.key)?;

        self.entries
            .insert(entry.key.clone(), entry.in_tier(Tier::Remote));
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.simulate().await?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.simulate().await?;
        self.check_read()?;
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_modified_since(
        &self,
        prefix: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        self.simulate().await?;
        self.check_read()?;
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .filter(|e| since.map_or(true, |since| e.created_at > since))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentType;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(key, json!(key), ContentType::GameHelp, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_remote_roundtrip() {
        let store = InMemoryRemoteStore::new();
        store.set(entry("a")).await.unwrap();

        let stored = store.get("a").await.unwrap().unwrap();
        assert_eq!(stored.tier, Tier::Remote);
        assert_eq!(store.upload_count(), 1);
        assert_eq!(store.list_keys("").await.unwrap(), vec!["a".to_string()]);
        assert!(store.delete("a").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failing_key() {
        let store = InMemoryRemoteStore::new();
        store.fail_key("bad");

        assert_matches!(store.set(entry("bad")).await, Err(Error::Network(_)));
        store.set(entry("good")).await.unwrap();
        assert_eq!(store.write_attempts(), 2);
        assert_eq!(store.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let store = InMemoryRemoteStore::new();
        store.fail_next_writes(2);

        assert!(store.set(entry("a")).await.is_err());
        assert!(store.set(entry("a")).await.is_err());
        store.set(entry("a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let store = InMemoryRemoteStore::new();
        store.seed(entry("a"));
        store.set_auth_failure(true);

        assert_matches!(store.get("a").await, Err(Error::Auth(_)));
        assert_matches!(store.set(entry("b")).await, Err(Error::Auth(_)));

        store.set_auth_failure(false);
        assert!(store.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_modified_since_filters_without_reads() {
        let store = InMemoryRemoteStore::new();
        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        let old = cutoff - chrono::Duration::minutes(5);
        store.seed(CacheEntry::with_timestamps(
            "old",
            json!("o"),
            ContentType::GameHelp,
            old,
            old + chrono::Duration::hours(1),
        ));
        store.seed(entry("new"));

        assert_eq!(
            store.list_modified_since("", Some(cutoff)).await.unwrap(),
            vec!["new".to_string()]
        );
        assert_eq!(store.list_modified_since("", None).await.unwrap().len(), 2);
        assert_eq!(store.read_count(), 0);
    }
}
