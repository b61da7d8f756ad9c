//! Local Tier - Persistent Device Storage
//!
//! Key-value storage that survives restarts, bounded by a byte quota the way
//! browser storage is. One JSON document per key when backed by a directory;
//! purely in-process when no directory is configured.
//!
//! # Design
//!
//! - File names are `<app prefix><url-encoded key>.json`, so unrelated files
//!   sharing the directory are ignored
//! - `set` never evicts on its own: a full tier fails with `QuotaExceeded`
//!   and the caller decides whether to call `evict_lru` and retry
//! - A `tokio::sync::Mutex` serializes access, including file I/O; only one
//!   script context uses the tier at a time

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::lru::LruMap;
use super::{DEFAULT_KEY_PREFIX, DEFAULT_LOCAL_QUOTA};
use crate::domain::{Tier, TierStore};
use crate::error::{Error, Result};

const FILE_SUFFIX: &str = ".json";

/// Local tier configuration
#[derive(Debug, Clone)]
pub struct LocalTierConfig {
    /// Maximum total entry size in bytes
    pub quota_bytes: u64,
    /// Backing directory (None = volatile)
    pub dir: Option<PathBuf>,
    /// Namespace prefix for persisted file names
    pub key_prefix: String,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            quota_bytes: DEFAULT_LOCAL_QUOTA,
            dir: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// Local persistent tier
pub struct LocalTier {
    entries: Mutex<LruMap>,
    config: LocalTierConfig,
}

impl LocalTier {
    /// Open the tier, loading any entries persisted under `config.dir`
    pub async fn open(config: LocalTierConfig) -> Result<Self> {
        let mut entries = LruMap::new();

        if let Some(dir) = &config.dir {
            tokio::fs::create_dir_all(dir).await?;
            let mut loaded = load_entries(dir, &config.key_prefix).await?;
            // Oldest writes become least recently used
            loaded.sort_by_key(|e| e.created_at);
            debug!(dir = %dir.display(), count = loaded.len(), "Loaded local tier");
            for entry in loaded {
                entries.insert(entry.in_tier(Tier::Local));
            }
        }

        Ok(Self {
            entries: Mutex::new(entries),
            config,
        })
    }

    /// Volatile tier with the given quota (for tests and ephemeral sessions)
    pub fn in_memory(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(LruMap::new()),
            config: LocalTierConfig {
                quota_bytes,
                ..Default::default()
            },
        }
    }

    /// Get configured quota
    pub fn quota(&self) -> u64 {
        self.config.quota_bytes
    }

    /// Get current size in bytes
    pub async fn size(&self) -> u64 {
        self.entries.lock().await.size()
    }

    /// Get number of entries
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Check if the tier is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn file_path(&self, key: &str) -> Option<PathBuf> {
        self.config.dir.as_ref().map(|dir| {
            dir.join(format!(
                "{}{}{}",
                self.config.key_prefix,
                urlencoding::encode(key),
                FILE_SUFFIX
            ))
        })
    }

    async fn remove_file(&self, key: &str) -> Result<()> {
        if let Some(path) = self.file_path(key) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

async fn load_entries(dir: &Path, prefix: &str) -> Result<Vec<CacheEntry>> {
    let mut loaded = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;

    while let Some(dirent) = read_dir.next_entry().await? {
        let name = dirent.file_name().to_string_lossy().to_string();
        if !name.starts_with(prefix) || !name.ends_with(FILE_SUFFIX) {
            continue;
        }

        let bytes = match tokio::fs::read(dirent.path()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %name, error = %e, "Skipping unreadable local entry");
                continue;
            }
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => loaded.push(entry),
            Err(e) => warn!(file = %name, error = %e, "Skipping corrupt local entry"),
        }
    }

    Ok(loaded)
}

#[async_trait]
impl TierStore for LocalTier {
    fn tier(&self) -> Tier {
        Tier::Local
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let entry = entry.in_tier(Tier::Local);
        let mut entries = self.entries.lock().await;

        let replaced = entries.peek(&entry.key).map(|e| e.size_bytes).unwrap_or(0);
        let used = entries.size() - replaced;
        let available = self.config.quota_bytes.saturating_sub(used);
        if entry.size_bytes > available {
            return Err(Error::QuotaExceeded {
                tier: Tier::Local.to_string(),
                needed: entry.size_bytes,
                available,
            });
        }

        if let Some(path) = self.file_path(&entry.key) {
            let json = serde_json::to_vec(&entry)?;
            tokio::fs::write(&path, json).await?;
        }
        entries.insert(entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let removed = entries.take(key).is_some();
        self.remove_file(key).await?;
        Ok(removed)
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys_with_prefix(prefix))
    }

    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().await.peek(key).cloned())
    }

    async fn touch(&self, key: &str) -> Result<()> {
        self.entries.lock().await.get(key);
        Ok(())
    }

    async fn list_modified_since(
        &self,
        prefix: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let entries = self.entries.lock().await;
        Ok(match since {
            Some(since) => entries.keys_written_after(prefix, since),
            None => entries.keys_with_prefix(prefix),
        })
    }

    async fn evict_lru(&self, bytes_needed: u64) -> Result<Vec<String>> {
        let mut entries = self.entries.lock().await;
        let target = self.config.quota_bytes.saturating_sub(bytes_needed);
        let evicted: Vec<String> = entries
            .evict_to(target)
            .into_iter()
            .map(|e| e.key)
            .collect();

        for key in &evicted {
            if let Err(e) = self.remove_file(key).await {
                warn!(key = %key, error = %e, "Failed to remove evicted local entry");
            }
        }
        debug!(count = evicted.len(), bytes_needed, "Evicted local entries");
        Ok(evicted)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentType;
    use serde_json::json;
    use std::time::Duration;

    fn make_entry(key: &str, payload_len: usize) -> CacheEntry {
        CacheEntry::new(
            key,
            json!("x".repeat(payload_len)),
            ContentType::GameHelp,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_local_set_get_delete() {
        let tier = LocalTier::in_memory(1024);
        tier.set(make_entry("a", 10)).await.unwrap();

        let entry = tier.get("a").await.unwrap().unwrap();
        assert_eq!(entry.tier, Tier::Local);
        assert!(tier.delete("a").await.unwrap());
        assert!(tier.get("a").await.unwrap().is_none());
        assert!(!tier.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_quota_exceeded() {
        let size = make_entry("k0", 100).size_bytes;
        let tier = LocalTier::in_memory(size * 2);

        tier.set(make_entry("k0", 100)).await.unwrap();
        tier.set(make_entry("k1", 100)).await.unwrap();

        let err = tier.set(make_entry("k2", 100)).await.unwrap_err();
        assert!(err.is_quota());
        assert_eq!(tier.len().await, 2);
    }

    #[tokio::test]
    async fn test_local_replace_counts_against_old_size() {
        let size = make_entry("k0", 100).size_bytes;
        let tier = LocalTier::in_memory(size);

        tier.set(make_entry("k0", 100)).await.unwrap();
        // Same key and size fits because the old copy is replaced
        tier.set(make_entry("k0", 100)).await.unwrap();
        assert_eq!(tier.size().await, size);
    }

    #[tokio::test]
    async fn test_local_evict_lru_then_retry() {
        let size = make_entry("k0", 100).size_bytes;
        let tier = LocalTier::in_memory(size * 2);

        tier.set(make_entry("k0", 100)).await.unwrap();
        tier.set(make_entry("k1", 100)).await.unwrap();
        tier.get("k0").await.unwrap();

        let evicted = tier.evict_lru(size).await.unwrap();
        assert_eq!(evicted, vec!["k1".to_string()]);
        tier.set(make_entry("k2", 100)).await.unwrap();
        assert!(tier.get("k0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_local_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalTierConfig {
            quota_bytes: 1024 * 1024,
            dir: Some(dir.path().to_path_buf()),
            key_prefix: "otakon_".to_string(),
        };

        {
            let tier = LocalTier::open(config.clone()).await.unwrap();
            tier.set(make_entry("game:Elden Ring:help", 20)).await.unwrap();
            tier.set(make_entry("news/today", 20)).await.unwrap();
            tier.delete("news/today").await.unwrap();
        }

        // Unrelated site data in the same directory is ignored
        tokio::fs::write(dir.path().join("other_app.json"), b"{}")
            .await
            .unwrap();
        // Corrupt files are skipped
        tokio::fs::write(dir.path().join("otakon_broken.json"), b"not json")
            .await
            .unwrap();

        let reopened = LocalTier::open(config).await.unwrap();
        let keys = reopened.list_keys("").await.unwrap();
        assert_eq!(keys, vec!["game:Elden Ring:help".to_string()]);
    }

    #[tokio::test]
    async fn test_local_list_keys_prefix() {
        let tier = LocalTier::in_memory(4096);
        tier.set(make_entry("game:a", 1)).await.unwrap();
        tier.set(make_entry("news:a", 1)).await.unwrap();

        assert_eq!(
            tier.list_keys("game:").await.unwrap(),
            vec!["game:a".to_string()]
        );
    }

    #[tokio::test]
    async fn test_local_peek_keeps_eviction_order() {
        let size = make_entry("k0", 100).size_bytes;
        let tier = LocalTier::in_memory(size * 2);

        tier.set(make_entry("k0", 100)).await.unwrap();
        tier.set(make_entry("k1", 100)).await.unwrap();
        assert!(tier.peek("k0").await.unwrap().is_some());

        let evicted = tier.evict_lru(size).await.unwrap();
        assert_eq!(evicted, vec!["k0".to_string()]);
    }

    #[tokio::test]
    async fn test_local_touch_refreshes_recency() {
        let size = make_entry("k0", 100).size_bytes;
        let tier = LocalTier::in_memory(size * 2);

        tier.set(make_entry("k0", 100)).await.unwrap();
        tier.set(make_entry("k1", 100)).await.unwrap();
        tier.touch("k0").await.unwrap();
        tier.touch("missing").await.unwrap();

        let evicted = tier.evict_lru(size).await.unwrap();
        assert_eq!(evicted, vec!["k1".to_string()]);
    }

    #[tokio::test]
    async fn test_local_list_modified_since() {
        let tier = LocalTier::in_memory(4096);
        let cutoff = chrono::Utc::now() - chrono::Duration::minutes(5);
        let old = cutoff - chrono::Duration::minutes(5);
        tier.set(CacheEntry::with_timestamps(
            "game:old",
            json!("o"),
            ContentType::GameHelp,
            old,
            old + chrono::Duration::hours(1),
        ))
        .await
        .unwrap();
        tier.set(make_entry("game:new", 1)).await.unwrap();
        tier.set(make_entry("news:new", 1)).await.unwrap();

        assert_eq!(
            tier.list_modified_since("game:", Some(cutoff)).await.unwrap(),
            vec!["game:new".to_string()]
        );
        let mut all = tier.list_modified_since("game:", None).await.unwrap();
        all.sort();
        assert_eq!(all, vec!["game:new".to_string(), "game:old".to_string()]);
    }
}
