//! Sync Reconciler
//!
//! Brings the local and remote tiers back into agreement after offline
//! periods, using last-write-wins on each entry's write timestamp.
//!
//! # Algorithm
//!
//! For every key written on either side since the last successful pass:
//!
//! | local      | remote     | action                                   |
//! |------------|------------|------------------------------------------|
//! | newer      | older      | push local → remote                      |
//! | older/tie  | newer/tie  | pull remote → local, drop memory copy    |
//! | present    | absent     | push                                     |
//! | absent     | present    | pull                                     |
//!
//! A key changed on both sides since the last pass counts as a conflict.
//! Only entries whose content type may live in the destination tier move.
//!
//! # Cancellation
//!
//! Each user has at most one pass in flight. Starting a new pass cancels
//! the previous one; the superseded pass returns `Error::Cancelled`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{
    is_reserved_key, retry, write_with_eviction, CacheEntry, UnifiedCache, RESERVED_PREFIX,
};
use crate::domain::{CacheEvent, Tier, TierStore};
use crate::error::{Error, Result};

/// Reserved key holding a user's sync state
pub fn sync_key(user_id: &str) -> String {
    format!("{}sync/{}", RESERVED_PREFIX, user_id)
}

// =============================================================================
// Sync State
// =============================================================================

/// Per-user reconciliation bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// User the state belongs to
    pub user_id: String,
    /// Start of the last pass that left nothing pending
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Keys the last pass could not reconcile
    pub pending_local_writes: u64,
    /// Keys changed on both sides, summed over all passes
    pub conflict_count: u64,
}

impl SyncState {
    /// State of a user who never synced
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            last_synced_at: None,
            pending_local_writes: 0,
            conflict_count: 0,
        }
    }

    /// Whether `entry` was written after the last successful pass
    pub fn changed_since_sync(&self, entry: &CacheEntry) -> bool {
        self.last_synced_at
            .map_or(true, |synced| entry.created_at > synced)
    }
}

/// Which copy wins a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Last-write-wins: local wins only if strictly newer; ties go to remote
pub fn resolve_conflict(local: &CacheEntry, remote: &CacheEntry) -> Side {
    if local.created_at > remote.created_at {
        Side::Local
    } else {
        Side::Remote
    }
}

#[derive(Debug, Default)]
struct PassOutcome {
    pushed: usize,
    pulled: usize,
    conflicts: u64,
    pending: u64,
}

// =============================================================================
// In-flight tracking
// =============================================================================

type InflightMap = DashMap<String, (u64, CancellationToken)>;

/// Unregisters a pass when it ends or is dropped, unless superseded
struct InflightGuard<'a> {
    inflight: &'a InflightMap,
    user_id: String,
    generation: u64,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight
            .remove_if(&self.user_id, |_, (generation, _)| *generation == self.generation);
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reconciles local and remote tiers per user
pub struct SyncReconciler {
    cache: Arc<UnifiedCache>,
    states: DashMap<String, SyncState>,
    inflight: InflightMap,
    generation: AtomicU64,
}

impl SyncReconciler {
    /// Create a reconciler over the cache's local tier
    pub fn new(cache: Arc<UnifiedCache>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            states: DashMap::new(),
            inflight: DashMap::new(),
            generation: AtomicU64::new(0),
        })
    }

    /// Last known state for a user
    pub fn state(&self, user_id: &str) -> Option<SyncState> {
        self.states.get(user_id).map(|s| s.clone())
    }

    /// Check if a pass is running for a user
    pub fn is_syncing(&self, user_id: &str) -> bool {
        self.inflight.contains_key(user_id)
    }

    /// Cancel the in-flight pass for a user
    pub fn cancel(&self, user_id: &str) -> bool {
        match self.inflight.remove(user_id) {
            Some((_, (_, token))) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one reconciliation pass
    pub async fn reconcile(&self, user_id: &str, remote: Arc<dyn TierStore>) -> Result<SyncState> {
        self.reconcile_with(user_id, remote, &CancellationToken::new())
            .await
    }

    /// Run one pass that also stops when `parent` is cancelled
    #[instrument(skip(self, remote, parent))]
    pub async fn reconcile_with(
        &self,
        user_id: &str,
        remote: Arc<dyn TierStore>,
        parent: &CancellationToken,
    ) -> Result<SyncState> {
        let token = parent.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self
            .inflight
            .insert(user_id.to_string(), (generation, token.clone()))
        {
            debug!("Superseding in-flight reconciliation");
            previous.cancel();
        }
        let _guard = InflightGuard {
            inflight: &self.inflight,
            user_id: user_id.to_string(),
            generation,
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.run_pass(user_id, remote.as_ref()) => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => {
                self.cache.metrics().record_sync_cancelled();
                self.publish(CacheEvent::SyncCancelled {
                    user_id: user_id.to_string(),
                    timestamp: Utc::now(),
                })
                .await;
                Err(Error::Cancelled(format!("reconciliation for {}", user_id)))
            }
        }
    }

    /// Run a pass in the background (connectivity restored)
    pub fn spawn_reconcile(
        self: &Arc<Self>,
        user_id: &str,
        remote: Arc<dyn TierStore>,
        parent: CancellationToken,
    ) -> JoinHandle<Result<SyncState>> {
        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        tokio::spawn(async move { this.reconcile_with(&user_id, remote, &parent).await })
    }

    /// Reconcile every `interval` until `shutdown` is cancelled or the session is rejected
    pub async fn run_periodic(
        self: Arc<Self>,
        user_id: String,
        remote: Arc<dyn TierStore>,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        info!(user_id = %user_id, interval_secs = interval.as_secs(), "Starting periodic sync");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.reconcile_with(&user_id, remote.clone(), &shutdown).await {
                Ok(state) => debug!(pending = state.pending_local_writes, "Periodic sync finished"),
                Err(Error::Cancelled(_)) if shutdown.is_cancelled() => break,
                Err(Error::Cancelled(_)) => debug!("Periodic sync superseded"),
                Err(e) if e.is_auth() => {
                    warn!(error = %e, "Stopping periodic sync until re-authentication");
                    break;
                }
                Err(e) => warn!(error = %e, "Periodic sync failed"),
            }
        }
        info!(user_id = %user_id, "Periodic sync stopped");
    }

    // =========================================================================
    // Pass
    // =========================================================================

    async fn run_pass(&self, user_id: &str, remote: &dyn TierStore) -> Result<SyncState> {
        let pass_start = Utc::now();
        let local = self
            .cache
            .local()
            .cloned()
            .ok_or_else(|| Error::Config("local storage is disabled".into()))?;
        let mut state = self.load_state(user_id, remote).await;

        let outcome = match self.reconcile_keys(&state, local.as_ref(), remote).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_auth() {
                    self.publish(CacheEvent::AuthRequired {
                        tier: Tier::Remote,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    })
                    .await;
                }
                return Err(e);
            }
        };

        state.conflict_count += outcome.conflicts;
        state.pending_local_writes = outcome.pending;
        if outcome.pending == 0 {
            state.last_synced_at = Some(pass_start);
        }
        self.states.insert(user_id.to_string(), state.clone());
        self.persist_state(&state, remote).await;

        self.cache.metrics().record_reconciliation(outcome.conflicts);
        info!(
            pushed = outcome.pushed,
            pulled = outcome.pulled,
            conflicts = outcome.conflicts,
            pending = outcome.pending,
            "Reconciliation finished"
        );
        self.publish(CacheEvent::SyncCompleted {
            user_id: user_id.to_string(),
            pushed: outcome.pushed,
            pulled: outcome.pulled,
            conflicts: outcome.conflicts,
            pending: outcome.pending,
            timestamp: Utc::now(),
        })
        .await;

        Ok(state)
    }

    async fn reconcile_keys(
        &self,
        state: &SyncState,
        local: &dyn TierStore,
        remote: &dyn TierStore,
    ) -> Result<PassOutcome> {
        let policy = self.cache.retry_policy();
        let now = Utc::now();
        let mut outcome = PassOutcome::default();

        // Keys untouched on both sides since the watermark are never fetched
        let since = state.last_synced_at;
        let local_keys = local.list_modified_since("", since).await?;
        let remote_keys =
            retry(policy, "list_keys", || remote.list_modified_since("", since)).await?;

        let keys: BTreeSet<&str> = local_keys
            .iter()
            .chain(remote_keys.iter())
            .map(String::as_str)
            .filter(|k| !is_reserved_key(k))
            .collect();
        debug!(candidates = keys.len(), "Reconciling keys changed since last sync");

        for key in keys {
            let local_entry = local.peek(key).await?.filter(|e| !e.is_expired_at(now));
            let remote_entry = match retry(policy, "get", || remote.get(key)).await {
                Ok(entry) => entry.filter(|e| !e.is_expired_at(now)),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not read remote entry");
                    outcome.pending += 1;
                    continue;
                }
            };

            let (source, side) = match (local_entry.as_ref(), remote_entry) {
                (None, None) => continue,
                (Some(l), None) => {
                    if !state.changed_since_sync(l) {
                        continue;
                    }
                    (l.clone(), Side::Local)
                }
                (None, Some(r)) => {
                    if !state.changed_since_sync(&r) {
                        continue;
                    }
                    (r, Side::Remote)
                }
                (Some(l), Some(r)) => {
                    let local_changed = state.changed_since_sync(l);
                    let remote_changed = state.changed_since_sync(&r);
                    if !local_changed && !remote_changed {
                        continue;
                    }
                    if l.created_at == r.created_at && l.value == r.value {
                        continue;
                    }
                    if local_changed && remote_changed {
                        outcome.conflicts += 1;
                    }
                    match resolve_conflict(l, &r) {
                        Side::Local => (l.clone(), Side::Local),
                        Side::Remote => (r, Side::Remote),
                    }
                }
            };

            let content_policy = self.cache.resolver().resolve(source.content_type);
            let (destination, tier) = match side {
                Side::Local => (remote, Tier::Remote),
                Side::Remote => (local, Tier::Local),
            };
            if !content_policy.allows(tier) {
                continue;
            }

            match write_with_eviction(destination, source, policy).await {
                Ok(_) => match side {
                    Side::Local => outcome.pushed += 1,
                    Side::Remote => {
                        self.cache.memory().remove(key);
                        outcome.pulled += 1;
                    }
                },
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!(key = %key, tier = %tier, error = %e, "Could not reconcile entry");
                    outcome.pending += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn load_state(&self, user_id: &str, remote: &dyn TierStore) -> SyncState {
        if let Some(state) = self.state(user_id) {
            return state;
        }
        match remote.get(&sync_key(user_id)).await {
            Ok(Some(entry)) => match serde_json::from_value(entry.value) {
                Ok(state) => return state,
                Err(e) => warn!(error = %e, "Discarding unreadable sync state"),
            },
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Remote sync state unavailable"),
        }
        SyncState::new(user_id)
    }

    async fn persist_state(&self, state: &SyncState, remote: &dyn TierStore) {
        let result = match serde_json::to_value(state) {
            Ok(value) => remote
                .set(CacheEntry::metadata(sync_key(&state.user_id), value))
                .await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            debug!(error = %e, "Sync state not persisted remotely");
        }
    }

    async fn publish(&self, event: CacheEvent) {
        if let Err(e) = self.cache.publisher().publish(event).await {
            debug!(error = %e, "Failed to publish sync event");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
