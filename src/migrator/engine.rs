//! Migration Engine
//!
//! Uploads device-only cache entries to the remote tier the first time a
//! user authenticates.
//!
//! # Guarantees
//!
//! 1. At most one migration per user runs at a time; concurrent callers join
//!    the in-flight run and receive its record
//! 2. A `Completed` record is final: later calls return it without work
//! 3. A failing key never blocks the rest; it is recorded and skipped
//! 4. Authentication failure or cancellation ends the run as `Failed`, which
//!    may be re-run later
//!
//! # Flow
//!
//! ```text
//! Pending ──▶ InProgress ──(all chunks attempted)──▶ Completed
//!                 │
//!                 └──(auth failure / cancelled)──▶ Failed
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{
    is_reserved_key, retry, write_with_eviction, CacheEntry, CacheMetrics,
    CacheStrategyResolver, RetryPolicy, RESERVED_PREFIX,
};
use crate::config::CacheOptions;
use crate::domain::{CacheEvent, EventPublisher, Tier, TierStore};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the migration coordinator
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Entries uploaded concurrently per chunk
    pub batch_size: usize,

    /// Backoff for each upload
    pub retry: RetryPolicy,

    /// Decides which content types may live remotely
    pub resolver: CacheStrategyResolver,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            retry: RetryPolicy::default(),
            resolver: CacheStrategyResolver::new(),
        }
    }
}

impl From<&CacheOptions> for MigrationConfig {
    fn from(options: &CacheOptions) -> Self {
        Self {
            batch_size: options.migration_batch_size,
            retry: options.retry_policy(),
            resolver: CacheStrategyResolver::new(),
        }
    }
}

/// Reserved key holding a user's migration record
pub fn migration_key(user_id: &str) -> String {
    format!("{}migration/{}", RESERVED_PREFIX, user_id)
}

// =============================================================================
// Migration Record
// =============================================================================

/// Status of a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Created, not yet started
    Pending,
    /// Uploading chunks
    InProgress,
    /// Every chunk attempted
    Completed,
    /// Aborted by auth failure or cancellation
    Failed,
}

impl MigrationStatus {
    /// Whether the run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Failed)
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "Pending"),
            MigrationStatus::InProgress => write!(f, "InProgress"),
            MigrationStatus::Completed => write!(f, "Completed"),
            MigrationStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Record of one migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Run identifier
    pub id: Uuid,

    /// User whose entries are migrated
    pub user_id: String,

    /// Tier entries are read from
    pub source_tier: Tier,

    /// Tier entries are uploaded to
    pub destination_tier: Tier,

    /// Current status
    pub status: MigrationStatus,

    /// Entries uploaded successfully
    pub migrated_item_count: u64,

    /// `"<key>: <reason>"` for every failure
    pub errors: Vec<String>,

    /// Keys that could not be uploaded
    pub failed_keys: Vec<String>,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run ended
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    fn new(user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            source_tier: Tier::Local,
            destination_tier: Tier::Remote,
            status: MigrationStatus::Pending,
            migrated_item_count: 0,
            errors: Vec::new(),
            failed_keys: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Check if the migration completed (possibly with failed keys)
    pub fn is_completed(&self) -> bool {
        self.status == MigrationStatus::Completed
    }

    /// Error if any key failed to migrate
    pub fn ensure_clean(&self) -> Result<()> {
        if self.failed_keys.is_empty() {
            Ok(())
        } else {
            Err(Error::MigrationPartialFailure {
                user_id: self.user_id.clone(),
                failed: self.failed_keys.len(),
            })
        }
    }

    /// Record a state transition; completed records never change
    fn transition(&mut self, status: MigrationStatus) {
        if self.status == MigrationStatus::Completed {
            return;
        }
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    fn record_success(&mut self) {
        if !self.status.is_terminal() {
            self.migrated_item_count += 1;
        }
    }

    fn record_failure(&mut self, key: &str, error: &Error) {
        if self.status.is_terminal() {
            return;
        }
        self.errors.push(format!("{}: {}", key, error));
        self.failed_keys.push(key.to_string());
    }

    /// Mark as failed
    fn fail(&mut self, reason: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.errors.push(reason.to_string());
        self.transition(MigrationStatus::Failed);
    }

    fn duration_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

// =============================================================================
// Active Migration Tracking
// =============================================================================

type ActiveMap = DashMap<String, Arc<watch::Sender<MigrationRecord>>>;

/// Unregisters an active migration when the run ends or is dropped
struct ActiveGuard<'a> {
    active: &'a ActiveMap,
    user_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.user_id);
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Moves device-only entries to the remote tier
pub struct MigrationCoordinator {
    config: MigrationConfig,
    local: Arc<dyn TierStore>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<CacheMetrics>,
    /// In-flight runs by user, broadcasting the latest record
    active: ActiveMap,
}

impl MigrationCoordinator {
    /// Create a new coordinator reading from `local`
    pub fn new(
        config: MigrationConfig,
        local: Arc<dyn TierStore>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<CacheMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            local,
            publisher,
            metrics,
            active: DashMap::new(),
        })
    }

    /// Check if a user's migration is running
    pub fn is_migrating(&self, user_id: &str) -> bool {
        self.active.contains_key(user_id)
    }

    /// Get count of active migrations
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Load the stored record for a user, if any
    pub async fn load_record(&self, user_id: &str) -> Result<Option<MigrationRecord>> {
        match self.local.get(&migration_key(user_id)).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    /// Migrate a user's local entries to `remote`
    ///
    /// Joins an in-flight run for the same user instead of starting another.
    #[instrument(skip(self, remote, cancel))]
    pub async fn start_migration(
        self: &Arc<Self>,
        user_id: &str,
        remote: Arc<dyn TierStore>,
        cancel: CancellationToken,
    ) -> Result<MigrationRecord> {
        let record = MigrationRecord::new(user_id);
        let (tx, _) = watch::channel(record.clone());
        let tx = Arc::new(tx);

        let joined = match self.active.entry(user_id.to_string()) {
            Entry::Occupied(active) => Some(active.get().subscribe()),
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
                None
            }
        };

        if let Some(mut rx) = joined {
            debug!("Joining in-flight migration");
            let finished = rx.wait_for(|r| r.status.is_terminal()).await.map(|r| r.clone());
            // Sender dropped mid-run: report the last known state
            return Ok(finished.unwrap_or_else(|_| rx.borrow().clone()));
        }

        let _guard = ActiveGuard {
            active: &self.active,
            user_id: user_id.to_string(),
        };
        let result = self.run(record, &tx, remote, &cancel).await;
        if let Ok(record) = &result {
            tx.send_replace(record.clone());
        }
        result
    }

    async fn run(
        &self,
        mut record: MigrationRecord,
        tx: &watch::Sender<MigrationRecord>,
        remote: Arc<dyn TierStore>,
        cancel: &CancellationToken,
    ) -> Result<MigrationRecord> {
        let user_id = record.user_id.clone();

        match self.load_record(&user_id).await {
            Ok(Some(stored)) if stored.is_completed() => {
                debug!(migration_id = %stored.id, "Migration already completed");
                return Ok(stored);
            }
            Ok(Some(stored)) => {
                info!(previous = %stored.id, status = %stored.status, "Re-running migration");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Unreadable migration record, starting fresh"),
        }

        record.transition(MigrationStatus::InProgress);
        self.persist_local(&record).await;
        tx.send_replace(record.clone());

        if cancel.is_cancelled() {
            return Ok(self.abort(record, "cancelled").await);
        }

        let pending = match self.pending_entries(remote.as_ref()).await {
            Ok(pending) => pending,
            Err(e) => {
                if e.is_auth() {
                    self.auth_required(&e).await;
                }
                return Ok(self.abort(record, &e.to_string()).await);
            }
        };

        info!(
            migration_id = %record.id,
            items = pending.len(),
            "Starting migration"
        );
        self.publish(CacheEvent::MigrationStarted {
            user_id: user_id.clone(),
            migration_id: record.id.to_string(),
            item_count: pending.len(),
            timestamp: Utc::now(),
        })
        .await;

        let start = Instant::now();
        let policy = &self.config.retry;

        for (index, chunk) in pending.chunks(self.config.batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                return Ok(self.abort(record, "cancelled").await);
            }

            let uploads = chunk.iter().map(|entry| {
                let remote = remote.clone();
                async move {
                    let result = write_with_eviction(remote.as_ref(), entry.clone(), policy).await;
                    (entry.key.as_str(), result)
                }
            });

            let mut failed_keys = Vec::new();
            let mut auth_error = None;
            for (key, result) in join_all(uploads).await {
                match result {
                    Ok(_) => record.record_success(),
                    Err(e) => {
                        record.record_failure(key, &e);
                        failed_keys.push(key.to_string());
                        if e.is_auth() {
                            auth_error = Some(e);
                        }
                    }
                }
            }

            debug!(
                chunk = index,
                size = chunk.len(),
                failed = failed_keys.len(),
                "Migration chunk uploaded"
            );

            if !failed_keys.is_empty() {
                warn!(chunk = index, failed = failed_keys.len(), "Migration chunk had failures");
                self.publish(CacheEvent::MigrationPartialFailure {
                    user_id: user_id.clone(),
                    migration_id: record.id.to_string(),
                    failed_keys,
                    timestamp: Utc::now(),
                })
                .await;
            }

            if let Some(e) = auth_error {
                self.auth_required(&e).await;
                return Ok(self.abort(record, &e.to_string()).await);
            }

            tx.send_replace(record.clone());
        }

        record.transition(MigrationStatus::Completed);
        self.persist_local(&record).await;
        self.persist_remote(&record, remote.as_ref()).await;

        let failed = record.failed_keys.len();
        self.metrics
            .record_migration(record.migrated_item_count, failed);
        info!(
            migration_id = %record.id,
            migrated = record.migrated_item_count,
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Migration completed"
        );
        self.publish(CacheEvent::MigrationCompleted {
            user_id,
            migration_id: record.id.to_string(),
            migrated: record.migrated_item_count,
            failed,
            duration_ms: record.duration_ms(),
            timestamp: Utc::now(),
        })
        .await;

        Ok(record)
    }

    /// Local, non-reserved, unexpired, remote-eligible entries missing from `remote`
    async fn pending_entries(&self, remote: &dyn TierStore) -> Result<Vec<CacheEntry>> {
        let policy = &self.config.retry;
        let uploaded: HashSet<String> = retry(policy, "list_keys", || remote.list_keys(""))
            .await?
            .into_iter()
            .collect();

        let now = Utc::now();
        let mut keys = self.local.list_keys("").await?;
        keys.sort();

        let mut pending = Vec::with_capacity(keys.len());
        for key in keys {
            if is_reserved_key(&key) || uploaded.contains(&key) {
                continue;
            }
            match self.local.peek(&key).await? {
                Some(entry) if entry.is_expired_at(now) => {}
                Some(entry) if !self.remote_eligible(&entry) => {
                    debug!(
                        key = %key,
                        content_type = %entry.content_type,
                        "Device-only entry not migrated"
                    );
                }
                Some(entry) => pending.push(entry),
                None => {}
            }
        }
        Ok(pending)
    }

    fn remote_eligible(&self, entry: &CacheEntry) -> bool {
        self.config
            .resolver
            .resolve(entry.content_type)
            .allows(Tier::Remote)
    }

    async fn abort(&self, mut record: MigrationRecord, reason: &str) -> MigrationRecord {
        record.fail(reason);
        self.persist_local(&record).await;
        warn!(migration_id = %record.id, reason, "Migration failed");
        self.publish(CacheEvent::MigrationFailed {
            user_id: record.user_id.clone(),
            migration_id: record.id.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        })
        .await;
        record
    }

    async fn auth_required(&self, error: &Error) {
        self.publish(CacheEvent::AuthRequired {
            tier: Tier::Remote,
            reason: error.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    fn record_entry(record: &MigrationRecord) -> Result<CacheEntry> {
        Ok(CacheEntry::metadata(
            migration_key(&record.user_id),
            serde_json::to_value(record)?,
        ))
    }

    async fn persist_local(&self, record: &MigrationRecord) {
        let result = match Self::record_entry(record) {
            Ok(entry) => write_with_eviction(self.local.as_ref(), entry, &self.config.retry)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(migration_id = %record.id, error = %e, "Failed to persist migration record");
        }
    }

    async fn persist_remote(&self, record: &MigrationRecord, remote: &dyn TierStore) {
        let result = match Self::record_entry(record) {
            Ok(entry) => remote.set(entry).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(migration_id = %record.id, error = %e, "Remote copy of migration record not stored");
        }
    }

    async fn publish(&self, event: CacheEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            debug!(error = %e, "Failed to publish migration event");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{EventRecorder, InMemoryRemoteStore};
    use crate::cache::{ContentType, LocalTier};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        coordinator: Arc<MigrationCoordinator>,
        local: Arc<LocalTier>,
        remote: Arc<InMemoryRemoteStore>,
        events: Arc<EventRecorder>,
        metrics: Arc<CacheMetrics>,
    }

    fn harness(batch_size: usize) -> Harness {
        let local = Arc::new(LocalTier::in_memory(10 * 1024 * 1024));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let events = Arc::new(EventRecorder::new());
        let metrics = Arc::new(CacheMetrics::new());
        let coordinator = MigrationCoordinator::new(
            MigrationConfig {
                batch_size,
                retry: RetryPolicy::immediate(3),
                ..Default::default()
            },
            local.clone(),
            events.clone(),
            metrics.clone(),
        );
        Harness {
            coordinator,
            local,
            remote,
            events,
            metrics,
        }
    }

    async fn seed_local(local: &LocalTier, count: usize) {
        for i in 0..count {
            local
                .set(CacheEntry::new(
                    format!("item-{:03}", i),
                    json!({ "n": i }),
                    ContentType::GameHelp,
                    Duration::from_secs(3600),
                ))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_migration_with_failing_keys_completes() {
        let h = harness(50);
        seed_local(&h.local, 100).await;
        for key in ["item-007", "item-042", "item-088"] {
            h.remote.fail_key(key);
        }

        let record = h
            .coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, MigrationStatus::Completed);
        assert_eq!(record.migrated_item_count, 97);
        assert_eq!(record.failed_keys.len(), 3);
        assert!(record.errors[0].starts_with("item-007: "));
        assert!(record.completed_at.is_some());
        assert!(matches!(
            record.ensure_clean(),
            Err(Error::MigrationPartialFailure { failed: 3, .. })
        ));
        assert!(h.remote.peek("item-006").is_some());
        assert!(h.remote.peek("item-007").is_none());

        // Both chunks contain a failing key
        assert_eq!(h.events.of_type("MigrationPartialFailure").len(), 2);
        assert_eq!(h.events.of_type("MigrationCompleted").len(), 1);
        assert_eq!(h.metrics.snapshot().migrated_items, 97);
        assert!(!h.coordinator.is_migrating("u1"));
    }

    #[tokio::test]
    async fn test_completed_migration_is_not_repeated() {
        let h = harness(10);
        seed_local(&h.local, 5).await;

        let first = h
            .coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();
        let uploads = h.remote.upload_count();

        seed_local(&h.local, 8).await;
        let second = h
            .coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, MigrationStatus::Completed);
        assert_eq!(h.remote.upload_count(), uploads);

        let stored = h.coordinator.load_record("u1").await.unwrap().unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_run() {
        let h = harness(4);
        seed_local(&h.local, 12).await;
        h.remote.set_latency(Duration::from_millis(5));

        let (a, b) = tokio::join!(
            h.coordinator
                .start_migration("u1", h.remote.clone(), CancellationToken::new()),
            h.coordinator
                .start_migration("u1", h.remote.clone(), CancellationToken::new()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.id, b.id);
        assert_eq!(a.status, MigrationStatus::Completed);
        assert_eq!(b.migrated_item_count, 12);
        assert_eq!(h.events.of_type("MigrationStarted").len(), 1);
    }

    #[tokio::test]
    async fn test_skips_reserved_expired_and_uploaded_keys() {
        let h = harness(50);
        seed_local(&h.local, 3).await;

        let now = Utc::now();
        h.local
            .set(CacheEntry::with_timestamps(
                "stale",
                json!(1),
                ContentType::DailyNews,
                now - chrono::Duration::hours(2),
                now - chrono::Duration::hours(1),
            ))
            .await
            .unwrap();
        h.local
            .set(CacheEntry::metadata("__meta/sync/u1", json!({})))
            .await
            .unwrap();
        h.remote.seed(CacheEntry::new(
            "item-000",
            json!("already there"),
            ContentType::GameHelp,
            Duration::from_secs(60),
        ));

        let record = h
            .coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.migrated_item_count, 2);
        assert!(h.remote.peek("stale").is_none());
        assert!(h.remote.peek("__meta/sync/u1").is_none());
        assert_eq!(h.remote.peek("item-000").unwrap().value, json!("already there"));
        // The final record is mirrored remotely
        assert!(h.remote.peek(&migration_key("u1")).is_some());
    }

    #[tokio::test]
    async fn test_device_only_entries_stay_local() {
        let h = harness(50);
        seed_local(&h.local, 2).await;
        h.local
            .set(CacheEntry::new(
                "prefs",
                json!({"theme": "dark"}),
                ContentType::Default,
                Duration::from_secs(3600),
            ))
            .await
            .unwrap();

        let record = h
            .coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, MigrationStatus::Completed);
        assert_eq!(record.migrated_item_count, 2);
        assert!(record.failed_keys.is_empty());
        assert!(h.remote.peek("prefs").is_none());
        assert!(h.local.peek("prefs").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_migration_leaves_local_eviction_order_alone() {
        let h = harness(50);
        // Written in reverse of the order migration visits them
        for key in ["item-b", "item-a"] {
            h.local
                .set(CacheEntry::new(
                    key,
                    json!(key),
                    ContentType::GameHelp,
                    Duration::from_secs(3600),
                ))
                .await
                .unwrap();
        }

        h.coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert!(h.remote.peek("item-a").is_some());

        let evicted = h.local.evict_lru(10 * 1024 * 1024).await.unwrap();
        assert_eq!(evicted, vec!["item-b".to_string(), "item-a".to_string()]);
    }

    #[tokio::test]
    async fn test_auth_failure_fails_migration() {
        let h = harness(50);
        seed_local(&h.local, 3).await;
        h.remote.set_auth_failure(true);

        let record = h
            .coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.status, MigrationStatus::Failed);
        assert_eq!(h.events.of_type("AuthRequired").len(), 1);
        assert_eq!(h.events.of_type("MigrationFailed").len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_migration_can_be_rerun() {
        let h = harness(2);
        seed_local(&h.local, 4).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let cancelled = h
            .coordinator
            .start_migration("u1", h.remote.clone(), cancel)
            .await
            .unwrap();
        assert_eq!(cancelled.status, MigrationStatus::Failed);
        assert_eq!(cancelled.errors, vec!["cancelled".to_string()]);
        assert_eq!(h.remote.upload_count(), 0);

        let rerun = h
            .coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(rerun.id, cancelled.id);
        assert_eq!(rerun.status, MigrationStatus::Completed);
        assert_eq!(rerun.migrated_item_count, 4);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let h = harness(50);
        seed_local(&h.local, 3).await;
        h.remote.fail_next_writes(2);

        let record = h
            .coordinator
            .start_migration("u1", h.remote.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.migrated_item_count, 3);
        assert!(record.failed_keys.is_empty());
    }

    #[test]
    fn test_completed_record_is_immutable() {
        let mut record = MigrationRecord::new("u1");
        record.transition(MigrationStatus::InProgress);
        record.record_success();
        record.transition(MigrationStatus::Completed);

        record.record_success();
        record.fail("late failure");
        record.transition(MigrationStatus::InProgress);

        assert_eq!(record.status, MigrationStatus::Completed);
        assert_eq!(record.migrated_item_count, 1);
        assert!(record.errors.is_empty());
    }
}
