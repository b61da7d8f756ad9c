//! Unified Cache - Memory → Local → Remote
//!
//! Single get/set surface over the three tiers. Reads probe the fastest tier
//! first and copy hits from slower tiers upward; writes land in memory
//! synchronously while slower tiers are filled by tracked background tasks.
//!
//! # Tier participation
//!
//! A tier is consulted for an operation only if it is both eligible under the
//! content type's policy and participating in this session:
//!
//! - memory always participates
//! - local participates when `use_local_storage` is on and a store was given
//! - remote participates while a store is attached and `use_remote_store` is on
//!
//! # Entry lifecycle
//!
//! ```text
//! Fresh ──(now > expires_at)──▶ Stale ──(next read)──▶ Evicted
//!   │                                                     ▲
//!   └──────────────(invalidate / capacity)────────────────┘
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use super::entry::{is_reserved_key, CacheEntry, ContentType};
use super::memory::MemoryTier;
use super::metrics::CacheMetrics;
use super::policy::{CacheStrategyResolver, ContentTypePolicy};
use super::retry::{write_with_eviction, RetryPolicy};
use super::similarity::SimilarityIndex;
use crate::config::CacheOptions;
use crate::domain::{CacheEvent, EventPublisher, EvictionReason, Tier, TierStore};
use crate::error::Result;

/// What to invalidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// A single key
    Key(String),
    /// Every key starting with a prefix
    Prefix(String),
}

impl Invalidation {
    fn matches(&self, key: &str) -> bool {
        match self {
            Invalidation::Key(k) => k == key,
            Invalidation::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

/// Shared pieces a background tier write needs after the caller returns
#[derive(Clone)]
struct TierWriter {
    retry: RetryPolicy,
    metrics: Arc<CacheMetrics>,
    publisher: Arc<dyn EventPublisher>,
}

impl TierWriter {
    /// Write with retry and quota eviction, reporting failures as events
    async fn write(&self, store: &dyn TierStore, entry: CacheEntry) -> Result<()> {
        let tier = store.tier();
        let key = entry.key.clone();

        match write_with_eviction(store, entry, &self.retry).await {
            Ok(evicted) => {
                if !evicted.is_empty() {
                    self.metrics.record_evictions(tier, evicted.len());
                    let now = Utc::now();
                    let events = evicted
                        .into_iter()
                        .map(|key| CacheEvent::EntryEvicted {
                            key,
                            tier,
                            reason: EvictionReason::Capacity,
                            timestamp: now,
                        })
                        .collect();
                    publish_all(self.publisher.as_ref(), events).await;
                }
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, tier = %tier, error = %e, "Tier write failed");
                self.metrics.record_write_failure(tier);
                let now = Utc::now();
                let mut events = vec![CacheEvent::TierWriteFailed {
                    key,
                    tier,
                    error: e.to_string(),
                    timestamp: now,
                }];
                if e.is_auth() {
                    events.push(CacheEvent::AuthRequired {
                        tier,
                        reason: e.to_string(),
                        timestamp: now,
                    });
                }
                publish_all(self.publisher.as_ref(), events).await;
                Err(e)
            }
        }
    }
}

async fn publish(publisher: &dyn EventPublisher, event: CacheEvent) {
    if let Err(e) = publisher.publish(event).await {
        debug!(error = %e, "Failed to publish cache event");
    }
}

async fn publish_all(publisher: &dyn EventPublisher, events: Vec<CacheEvent>) {
    if let Err(e) = publisher.publish_all(events).await {
        debug!(error = %e, "Failed to publish cache events");
    }
}

/// Unified three-tier cache
pub struct UnifiedCache {
    /// Memory tier (always participating)
    memory: Arc<MemoryTier>,
    /// Local tier, if participating
    local: Option<Arc<dyn TierStore>>,
    /// Remote tier, attached while a session is authenticated
    remote: RwLock<Option<Arc<dyn TierStore>>>,
    /// Whether an attached remote is consulted
    use_remote_store: bool,
    /// Content type policy table
    resolver: CacheStrategyResolver,
    /// Recent keys for near-duplicate lookup
    similar: SimilarityIndex,
    /// Background write plumbing
    writer: TierWriter,
    /// Fire-and-forget tier writes
    tasks: TaskTracker,
}

impl UnifiedCache {
    /// Create a cache over the given tiers
    ///
    /// `local` is ignored when `options.use_local_storage` is off.
    pub fn new(
        options: &CacheOptions,
        memory: Arc<MemoryTier>,
        local: Option<Arc<dyn TierStore>>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            memory,
            local: local.filter(|_| options.use_local_storage),
            remote: RwLock::new(None),
            use_remote_store: options.use_remote_store,
            resolver: CacheStrategyResolver::new(),
            similar: SimilarityIndex::new(options.similarity_window),
            writer: TierWriter {
                retry: options.retry_policy(),
                metrics: Arc::new(CacheMetrics::new()),
                publisher,
            },
            tasks: TaskTracker::new(),
        }
    }

    /// Replace the policy table
    pub fn with_resolver(mut self, resolver: CacheStrategyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Attach the remote tier for an authenticated session
    pub fn attach_remote(&self, remote: Arc<dyn TierStore>) {
        if !self.use_remote_store {
            debug!("Remote store disabled, attached tier will not be consulted");
        }
        *self.remote.write() = Some(remote);
    }

    /// Detach the remote tier (logout)
    pub fn detach_remote(&self) -> Option<Arc<dyn TierStore>> {
        self.remote.write().take()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Cache metrics
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.writer.metrics
    }

    /// Event publisher
    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.writer.publisher
    }

    /// Retry policy used for tier writes
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.writer.retry
    }

    /// Memory tier
    pub fn memory(&self) -> &Arc<MemoryTier> {
        &self.memory
    }

    /// Local tier, if participating
    pub fn local(&self) -> Option<&Arc<dyn TierStore>> {
        self.local.as_ref()
    }

    /// Remote tier, if attached and participating
    pub fn remote(&self) -> Option<Arc<dyn TierStore>> {
        if self.use_remote_store {
            self.remote.read().clone()
        } else {
            None
        }
    }

    /// Policy table
    pub fn resolver(&self) -> &CacheStrategyResolver {
        &self.resolver
    }

    /// Participating slower tiers eligible under `policy`, fastest first
    fn slow_tiers(&self, policy: Option<&ContentTypePolicy>) -> Vec<Arc<dyn TierStore>> {
        let allows = |tier: Tier| policy.map_or(true, |p| p.allows(tier));
        let mut tiers = Vec::with_capacity(2);
        if let Some(local) = &self.local {
            if allows(Tier::Local) {
                tiers.push(local.clone());
            }
        }
        if let Some(remote) = self.remote() {
            if allows(Tier::Remote) {
                tiers.push(remote);
            }
        }
        tiers
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value, probing memory → local → remote
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str, content_type: ContentType) -> Result<Option<Value>> {
        Ok(self.get_entry(key, content_type).await?.map(|e| e.value))
    }

    /// Get the full entry, probing memory → local → remote
    pub async fn get_entry(
        &self,
        key: &str,
        content_type: ContentType,
    ) -> Result<Option<CacheEntry>> {
        let policy = self.resolver.resolve(content_type);
        let metrics = &self.writer.metrics;
        let now = Utc::now();

        if policy.allows(Tier::Memory) {
            match self.memory.get_entry(key) {
                Some(entry) if !entry.is_expired_at(now) => {
                    metrics.record_hit(Tier::Memory);
                    self.touch_local(key, &policy).await;
                    return Ok(Some(entry));
                }
                Some(_) => {
                    metrics.record_stale_read();
                    self.memory.remove(key);
                    self.publish_expired(key, Tier::Memory).await;
                }
                None => metrics.record_miss(Tier::Memory),
            }
        }

        for store in self.slow_tiers(Some(&policy)) {
            let tier = store.tier();
            match store.get(key).await {
                Ok(Some(entry)) if !entry.is_expired_at(now) => {
                    metrics.record_hit(tier);
                    if policy.similarity_threshold.is_some() {
                        self.similar.record(content_type, key);
                    }
                    self.promote(&entry, tier, &policy).await;
                    return Ok(Some(entry));
                }
                Ok(Some(_)) => {
                    metrics.record_stale_read();
                    self.delete_in_background(store, key.to_string());
                }
                Ok(None) => metrics.record_miss(tier),
                Err(e) if e.is_auth() => {
                    warn!(key = %key, tier = %tier, error = %e, "Tier rejected session");
                    publish(
                        self.writer.publisher.as_ref(),
                        CacheEvent::AuthRequired {
                            tier,
                            reason: e.to_string(),
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
                    return Err(e);
                }
                Err(e) => {
                    debug!(key = %key, tier = %tier, error = %e, "Tier read failed, treating as miss");
                    metrics.record_error(tier);
                }
            }
        }

        metrics.record_full_miss();
        Ok(None)
    }

    /// Keep the local copy of a memory hit from aging out of the local LRU
    async fn touch_local(&self, key: &str, policy: &ContentTypePolicy) {
        if !policy.allows(Tier::Local) {
            return;
        }
        if let Some(local) = &self.local {
            if let Err(e) = local.touch(key).await {
                debug!(key = %key, error = %e, "Local recency refresh failed");
            }
        }
    }

    /// Copy an entry found in `from` into the faster eligible tiers
    async fn promote(&self, entry: &CacheEntry, from: Tier, policy: &ContentTypePolicy) {
        let mut events = Vec::new();

        if policy.allows(Tier::Memory) && self.store_in_memory(entry.clone()).await {
            events.push(CacheEvent::EntryPromoted {
                key: entry.key.clone(),
                from,
                to: Tier::Memory,
                timestamp: Utc::now(),
            });
        }

        if from == Tier::Remote && policy.allows(Tier::Local) {
            if let Some(local) = self.local.clone() {
                let writer = self.writer.clone();
                let promoted = entry.clone();
                self.tasks.spawn(async move {
                    let key = promoted.key.clone();
                    if writer.write(local.as_ref(), promoted).await.is_ok() {
                        writer.metrics.record_promotion();
                        publish(
                            writer.publisher.as_ref(),
                            CacheEvent::EntryPromoted {
                                key,
                                from: Tier::Remote,
                                to: Tier::Local,
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                    }
                });
            }
        }

        if !events.is_empty() {
            self.writer.metrics.record_promotion();
            debug!(key = %entry.key, from = %from, "Promoted entry");
            publish_all(self.writer.publisher.as_ref(), events).await;
        }
    }

    /// Near-duplicate lookup for content types with a similarity threshold
    #[instrument(skip(self))]
    pub async fn get_similar(
        &self,
        query_key: &str,
        content_type: ContentType,
    ) -> Result<Option<Value>> {
        if let Some(value) = self.get(query_key, content_type).await? {
            return Ok(Some(value));
        }

        let policy = self.resolver.resolve(content_type);
        let Some(threshold) = policy.similarity_threshold else {
            return Ok(None);
        };
        let Some(candidate) = self.similar.best_match(content_type, query_key, threshold) else {
            return Ok(None);
        };

        match self.get(&candidate.key, content_type).await? {
            Some(value) => {
                debug!(query = %query_key, key = %candidate.key, score = candidate.score, "Similar entry hit");
                self.writer.metrics.record_similar_hit();
                Ok(Some(value))
            }
            None => {
                self.similar.forget(Some(content_type), &candidate.key);
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a value in every eligible participating tier
    ///
    /// Returns once the fastest eligible tier has the entry; slower tiers are
    /// written in the background. An entry the memory tier rejects (larger
    /// than its budget) is awaited on the next tier instead.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: Value, content_type: ContentType) -> Result<()> {
        let policy = self.resolver.resolve(content_type);
        let entry = CacheEntry::new(key, value, content_type, policy.ttl);
        let mut slow = self.slow_tiers(Some(&policy)).into_iter();

        let in_memory = policy.allows(Tier::Memory) && {
            let stored = self.store_in_memory(entry.clone()).await;
            if !stored {
                debug!(key = %key, size = entry.size_bytes, "Entry exceeds memory budget");
            }
            stored
        };

        // Without a memory copy the next tier must hold the entry before returning
        if !in_memory {
            match slow.next() {
                Some(first) => self.writer.write(first.as_ref(), entry.clone()).await?,
                None => debug!(key = %key, "No participating tier for content type"),
            }
        }

        for store in slow {
            let writer = self.writer.clone();
            let entry = entry.clone();
            self.tasks.spawn(async move {
                let _ = writer.write(store.as_ref(), entry).await;
            });
        }

        if policy.similarity_threshold.is_some() {
            self.similar.record(content_type, key);
        }
        Ok(())
    }

    /// Insert into memory, reporting capacity evictions
    async fn store_in_memory(&self, entry: CacheEntry) -> bool {
        let outcome = self.memory.insert(entry);
        if !outcome.evicted.is_empty() {
            self.writer
                .metrics
                .record_evictions(Tier::Memory, outcome.evicted.len());
            let now = Utc::now();
            let events = outcome
                .evicted
                .into_iter()
                .map(|key| CacheEvent::EntryEvicted {
                    key,
                    tier: Tier::Memory,
                    reason: EvictionReason::Capacity,
                    timestamp: now,
                })
                .collect();
            publish_all(self.writer.publisher.as_ref(), events).await;
        }
        outcome.stored
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Remove matching keys
    ///
    /// With a content type, only tiers eligible for it are touched; without
    /// one, every participating tier is. Reserved keys are never removed.
    /// Returns the number of distinct keys removed from at least one tier.
    #[instrument(skip(self))]
    pub async fn invalidate(
        &self,
        target: Invalidation,
        content_type: Option<ContentType>,
    ) -> Result<usize> {
        let policy = content_type.map(|ct| self.resolver.resolve(ct));
        let mut removed: HashSet<String> = HashSet::new();
        let mut events = Vec::new();
        let now = Utc::now();

        if policy.as_ref().map_or(true, |p| p.allows(Tier::Memory)) {
            let keys = match &target {
                Invalidation::Key(key) => vec![key.clone()],
                Invalidation::Prefix(prefix) => self.memory.keys_with_prefix(prefix),
            };
            for key in keys.into_iter().filter(|k| !is_reserved_key(k)) {
                if self.memory.remove(&key).is_some() {
                    events.push(CacheEvent::EntryEvicted {
                        key: key.clone(),
                        tier: Tier::Memory,
                        reason: EvictionReason::Invalidated,
                        timestamp: now,
                    });
                    removed.insert(key);
                }
            }
        }

        for store in self.slow_tiers(policy.as_ref()) {
            let tier = store.tier();
            let keys = match &target {
                Invalidation::Key(key) => vec![key.clone()],
                Invalidation::Prefix(prefix) => match store.list_keys(prefix).await {
                    Ok(keys) => keys,
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => {
                        warn!(tier = %tier, error = %e, "Failed to list keys for invalidation");
                        continue;
                    }
                },
            };

            for key in keys
                .into_iter()
                .filter(|k| !is_reserved_key(k) && target.matches(k))
            {
                match store.delete(&key).await {
                    Ok(true) => {
                        events.push(CacheEvent::EntryEvicted {
                            key: key.clone(),
                            tier,
                            reason: EvictionReason::Invalidated,
                            timestamp: now,
                        });
                        removed.insert(key);
                    }
                    Ok(false) => {}
                    Err(e) if e.is_auth() => return Err(e),
                    Err(e) => warn!(key = %key, tier = %tier, error = %e, "Failed to invalidate"),
                }
            }
        }

        match &target {
            Invalidation::Key(key) => self.similar.forget(content_type, key),
            Invalidation::Prefix(prefix) => self.similar.forget_prefix(content_type, prefix),
        }

        self.writer.metrics.record_invalidations(removed.len());
        publish_all(self.writer.publisher.as_ref(), events).await;
        debug!(removed = removed.len(), "Invalidated keys");
        Ok(removed.len())
    }

    // =========================================================================
    // Background work
    // =========================================================================

    fn delete_in_background(&self, store: Arc<dyn TierStore>, key: String) {
        let publisher = self.writer.publisher.clone();
        self.tasks.spawn(async move {
            let tier = store.tier();
            match store.delete(&key).await {
                Ok(true) => {
                    publish(
                        publisher.as_ref(),
                        CacheEvent::EntryEvicted {
                            key,
                            tier,
                            reason: EvictionReason::Expired,
                            timestamp: Utc::now(),
                        },
                    )
                    .await
                }
                Ok(false) => {}
                Err(e) => debug!(key = %key, tier = %tier, error = %e, "Failed to delete stale entry"),
            }
        });
    }

    async fn publish_expired(&self, key: &str, tier: Tier) {
        publish(
            self.writer.publisher.as_ref(),
            CacheEvent::EntryEvicted {
                key: key.to_string(),
                tier,
                reason: EvictionReason::Expired,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    /// Wait for all outstanding background writes
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Number of background writes still running
    pub fn pending_writes(&self) -> usize {
        self.tasks.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{EventRecorder, InMemoryRemoteStore};
    use crate::cache::{LocalTier, DEFAULT_MEMORY_BUDGET};
    use crate::error::Error;
    use assert_matches::assert_matches;
    use serde_json::json;

    struct Harness {
        cache: UnifiedCache,
        local: Arc<LocalTier>,
        remote: Arc<InMemoryRemoteStore>,
        events: Arc<EventRecorder>,
    }

    fn harness(options: CacheOptions) -> Harness {
        let local = Arc::new(LocalTier::in_memory(options.local_quota_bytes));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let events = Arc::new(EventRecorder::new());
        let cache = UnifiedCache::new(
            &options,
            Arc::new(MemoryTier::with_budget(options.memory_budget_bytes)),
            Some(local.clone() as Arc<dyn TierStore>),
            events.clone(),
        );
        cache.attach_remote(remote.clone());
        Harness {
            cache,
            local,
            remote,
            events,
        }
    }

    fn fast_options() -> CacheOptions {
        CacheOptions {
            retry_base_delay_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_set_then_get_hits_memory() {
        let h = harness(fast_options());
        h.cache
            .set("news:today", json!({"headline": "x"}), ContentType::DailyNews)
            .await
            .unwrap();

        let value = h.cache.get("news:today", ContentType::DailyNews).await.unwrap();
        assert_eq!(value, Some(json!({"headline": "x"})));
        assert_eq!(h.cache.metrics().snapshot().memory.hits, 1);
    }

    #[tokio::test]
    async fn test_set_fills_slow_tiers_in_background() {
        let h = harness(fast_options());
        h.cache
            .set("game:1:help", json!("tip"), ContentType::GameHelp)
            .await
            .unwrap();
        h.cache.flush().await;

        assert!(h.local.get("game:1:help").await.unwrap().is_some());
        assert!(h.remote.get("game:1:help").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_default_policy_never_reaches_remote() {
        let h = harness(fast_options());
        h.cache
            .set("prefs", json!(1), ContentType::Default)
            .await
            .unwrap();
        h.cache.flush().await;

        assert!(h.local.get("prefs").await.unwrap().is_some());
        assert!(h.remote.get("prefs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_hit_promotes_to_memory() {
        let h = harness(fast_options());
        let entry = CacheEntry::new(
            "game:2:help",
            json!("from disk"),
            ContentType::GameHelp,
            std::time::Duration::from_secs(600),
        );
        let expires_at = entry.expires_at;
        h.local.set(entry).await.unwrap();

        let value = h.cache.get("game:2:help", ContentType::GameHelp).await.unwrap();
        assert_eq!(value, Some(json!("from disk")));

        let promoted = h.cache.memory().get_entry("game:2:help").unwrap();
        assert_eq!(promoted.expires_at, expires_at);
        assert_eq!(
            h.events.of_type("EntryPromoted").len(),
            1,
            "one promotion into memory"
        );
    }

    #[tokio::test]
    async fn test_remote_hit_promotes_to_local_and_memory() {
        let h = harness(fast_options());
        let entry = CacheEntry::new(
            "global:banner",
            json!("remote"),
            ContentType::GlobalContent,
            std::time::Duration::from_secs(600),
        );
        h.remote.set(entry).await.unwrap();

        let value = h.cache.get("global:banner", ContentType::GlobalContent).await.unwrap();
        assert_eq!(value, Some(json!("remote")));
        h.cache.flush().await;

        assert!(h.cache.memory().contains("global:banner"));
        assert!(h.local.get("global:banner").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_deleted() {
        let h = harness(fast_options());
        let now = Utc::now();
        let stale = CacheEntry::with_timestamps(
            "news:old",
            json!("old"),
            ContentType::DailyNews,
            now - chrono::Duration::hours(7),
            now - chrono::Duration::hours(1),
        );
        h.local.set(stale).await.unwrap();

        assert_eq!(h.cache.get("news:old", ContentType::DailyNews).await.unwrap(), None);
        h.cache.flush().await;
        assert!(h.local.get("news:old").await.unwrap().is_none());
        assert_eq!(h.cache.metrics().snapshot().stale_reads, 1);
    }

    #[tokio::test]
    async fn test_remote_network_error_degrades_to_miss() {
        let h = harness(fast_options());
        h.remote.fail_reads(true);

        let value = h.cache.get("absent", ContentType::DailyNews).await.unwrap();
        assert_eq!(value, None);
        assert_eq!(h.cache.metrics().snapshot().remote.errors, 1);
    }

    #[tokio::test]
    async fn test_remote_auth_error_propagates() {
        let h = harness(fast_options());
        h.remote.set_auth_failure(true);

        let result = h.cache.get("absent", ContentType::DailyNews).await;
        assert_matches!(result, Err(Error::Auth(_)));
        assert_eq!(h.events.of_type("AuthRequired").len(), 1);
    }

    #[tokio::test]
    async fn test_background_auth_failure_publishes_events() {
        let h = harness(fast_options());
        h.remote.set_auth_failure(true);

        h.cache
            .set("news:1", json!(1), ContentType::DailyNews)
            .await
            .unwrap();
        h.cache.flush().await;

        assert_eq!(h.events.of_type("TierWriteFailed").len(), 1);
        assert_eq!(h.events.of_type("AuthRequired").len(), 1);
        assert_eq!(h.cache.metrics().snapshot().remote.write_failures, 1);
        // The memory write still succeeded
        assert!(h.cache.memory().contains("news:1"));
    }

    #[tokio::test]
    async fn test_memory_ineligible_awaits_fastest_tier() {
        let options = fast_options();
        let local = Arc::new(LocalTier::in_memory(options.local_quota_bytes));
        let resolver = CacheStrategyResolver::new()
            .with_override(ContentTypePolicy {
                content_type: ContentType::GlobalContent,
                ttl: std::time::Duration::from_secs(60),
                eligible_tiers: vec![Tier::Local],
                similarity_threshold: None,
            })
            .unwrap();
        let cache = UnifiedCache::new(
            &options,
            Arc::new(MemoryTier::new()),
            Some(local.clone() as Arc<dyn TierStore>),
            Arc::new(EventRecorder::new()),
        )
        .with_resolver(resolver);

        cache
            .set("global:x", json!("x"), ContentType::GlobalContent)
            .await
            .unwrap();
        // No flush: the local write was awaited directly
        assert!(local.get("global:x").await.unwrap().is_some());
        assert!(!cache.memory().contains("global:x"));
    }

    #[tokio::test]
    async fn test_entry_over_memory_budget_is_readable_immediately() {
        let h = harness(CacheOptions {
            memory_budget_bytes: 16,
            ..fast_options()
        });
        let tip = json!("Use parry timing against the Tree Sentinel");

        h.cache
            .set("game:Elden Ring:help", tip.clone(), ContentType::GameHelp)
            .await
            .unwrap();

        // No flush: the local write was awaited in place of memory
        assert!(!h.cache.memory().contains("game:Elden Ring:help"));
        assert!(h.local.get("game:Elden Ring:help").await.unwrap().is_some());
        let value = h
            .cache
            .get("game:Elden Ring:help", ContentType::GameHelp)
            .await
            .unwrap();
        assert_eq!(value, Some(tip));
    }

    #[tokio::test]
    async fn test_memory_hit_keeps_local_copy_recent() {
        let size = CacheEntry::new(
            "k0",
            json!("payload"),
            ContentType::Default,
            std::time::Duration::from_secs(60),
        )
        .size_bytes;
        let h = harness(CacheOptions {
            local_quota_bytes: size * 2,
            ..fast_options()
        });

        for key in ["k0", "k1"] {
            h.cache.set(key, json!("payload"), ContentType::Default).await.unwrap();
            h.cache.flush().await;
        }
        assert!(h.cache.get("k0", ContentType::Default).await.unwrap().is_some());
        assert_eq!(h.cache.metrics().snapshot().memory.hits, 1);

        h.cache.set("k2", json!("payload"), ContentType::Default).await.unwrap();
        h.cache.flush().await;

        assert!(h.local.peek("k0").await.unwrap().is_some());
        assert!(h.local.peek("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_disabled_is_not_consulted() {
        let options = CacheOptions {
            use_local_storage: false,
            ..fast_options()
        };
        let local = Arc::new(LocalTier::in_memory(1024));
        let cache = UnifiedCache::new(
            &options,
            Arc::new(MemoryTier::new()),
            Some(local.clone() as Arc<dyn TierStore>),
            Arc::new(EventRecorder::new()),
        );
        assert!(cache.local().is_none());

        cache.set("prefs", json!(1), ContentType::Default).await.unwrap();
        cache.flush().await;
        assert!(local.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_counts_distinct_keys_and_is_idempotent() {
        let h = harness(fast_options());
        for key in ["game:1:help", "game:2:help"] {
            h.cache.set(key, json!(key), ContentType::GameHelp).await.unwrap();
        }
        h.cache.flush().await;

        let removed = h
            .cache
            .invalidate(Invalidation::Prefix("game:".into()), None)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let again = h
            .cache
            .invalidate(Invalidation::Prefix("game:".into()), None)
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert!(h.remote.get("game:1:help").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_skips_reserved_keys() {
        let h = harness(fast_options());
        h.local
            .set(CacheEntry::metadata("__meta/migration/u1", json!({})))
            .await
            .unwrap();

        let removed = h
            .cache
            .invalidate(Invalidation::Prefix(String::new()), None)
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(h.local.get("__meta/migration/u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_similar_finds_near_duplicate() {
        let h = harness(fast_options());
        h.cache
            .set(
                "elden ring how to beat malenia",
                json!("dodge waterfowl"),
                ContentType::AiResponse,
            )
            .await
            .unwrap();

        let hit = h
            .cache
            .get_similar("Elden Ring: how to beat Malenia?", ContentType::AiResponse)
            .await
            .unwrap();
        assert_eq!(hit, Some(json!("dodge waterfowl")));

        let miss = h
            .cache
            .get_similar("elden ring best armor", ContentType::AiResponse)
            .await
            .unwrap();
        assert_eq!(miss, None);
        assert_eq!(h.cache.metrics().snapshot().similar_hits, 1);
    }

    #[tokio::test]
    async fn test_get_similar_without_threshold_misses() {
        let h = harness(fast_options());
        h.cache
            .set("news about elden ring", json!(1), ContentType::DailyNews)
            .await
            .unwrap();

        let hit = h
            .cache
            .get_similar("News about Elden Ring", ContentType::DailyNews)
            .await
            .unwrap();
        assert_eq!(hit, None);
    }

    #[tokio::test]
    async fn test_memory_capacity_eviction_event() {
        let entry_size = CacheEntry::new(
            "k0",
            json!("payload"),
            ContentType::Default,
            std::time::Duration::from_secs(60),
        )
        .size_bytes;
        let options = CacheOptions {
            memory_budget_bytes: entry_size * 2,
            ..fast_options()
        };
        let h = harness(options);
        assert!(h.cache.memory().budget() < DEFAULT_MEMORY_BUDGET);

        for key in ["k0", "k1", "k2"] {
            h.cache.set(key, json!("payload"), ContentType::Default).await.unwrap();
        }
        assert_eq!(h.cache.memory().len(), 2);
        assert_eq!(h.events.of_type("EntryEvicted").len(), 1);
        // Evicted from memory but still served from local
        h.cache.flush().await;
        assert!(h.cache.get("k0", ContentType::Default).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_detach_remote() {
        let h = harness(fast_options());
        assert!(h.cache.remote().is_some());
        h.cache.detach_remote();
        assert!(h.cache.remote().is_none());
    }
}
