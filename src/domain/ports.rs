//! Domain Ports (Port/Adapter Pattern)
//!
//! Core abstractions the cache orchestration depends on. Storage backends and
//! event sinks implement these traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │          TierStore        │      EventPublisher      │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │ MemoryTier │ LocalTier │ HttpRemoteStore │ Publishers│    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::CacheEvent;
use crate::cache::CacheEntry;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Storage tier, ordered by increasing latency (and increasing durability).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Process memory; lost on restart
    Memory,
    /// Local persistent key-value storage; bounded by quota
    Local,
    /// Remote managed database; shared across devices
    Remote,
}

impl Tier {
    /// All tiers in probe order (fastest first).
    pub const ALL: [Tier; 3] = [Tier::Memory, Tier::Local, Tier::Remote];

    /// Tier name as used in logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Local => "local",
            Tier::Remote => "remote",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tier Store Port
// =============================================================================

/// Port for a single storage tier.
///
/// Expiry is carried by the entry itself (`expires_at`); tiers store whatever
/// they are given and leave staleness decisions to the orchestrator.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Which tier this store implements.
    fn tier(&self) -> Tier;

    /// Read an entry.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Write (or overwrite) an entry.
    async fn set(&self, entry: CacheEntry) -> Result<()>;

    /// Delete an entry. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// List keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Read an entry without counting it as a use.
    ///
    /// Bulk scans go through here so they leave eviction order untouched.
    async fn peek(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.get(key).await
    }

    /// Mark an entry as recently used without reading it.
    async fn touch(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    /// Keys starting with `prefix` whose entry was written after `since`.
    ///
    /// `None` lists every key. Backends that can filter on `created_at`
    /// server-side should override this.
    async fn list_modified_since(
        &self,
        prefix: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let keys = self.list_keys(prefix).await?;
        let Some(since) = since else {
            return Ok(keys);
        };
        let mut modified = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.peek(&key).await? {
                if entry.created_at > since {
                    modified.push(key);
                }
            }
        }
        Ok(modified)
    }

    /// Free at least `bytes_needed` by dropping least-recently-used entries.
    ///
    /// Returns the evicted keys. Tiers without a capacity notion evict nothing.
    async fn evict_lru(&self, _bytes_needed: u64) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing cache events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a cache event.
    async fn publish(&self, event: CacheEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<CacheEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering_is_latency_order() {
        assert!(Tier::Memory < Tier::Local);
        assert!(Tier::Local < Tier::Remote);

        let mut tiers = vec![Tier::Remote, Tier::Memory, Tier::Local];
        tiers.sort();
        assert_eq!(tiers, Tier::ALL.to_vec());
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Memory.to_string(), "memory");
        assert_eq!(Tier::Local.to_string(), "local");
        assert_eq!(Tier::Remote.to_string(), "remote");
    }

    #[test]
    fn test_tier_serde() {
        let json = serde_json::to_string(&Tier::Remote).unwrap();
        assert_eq!(json, "\"remote\"");
        let tier: Tier = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(tier, Tier::Local);
    }
}
