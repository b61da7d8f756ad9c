//! Cache Service
//!
//! Long-lived orchestration object owning the tiers, the event channel and
//! the background coordinators. One instance is built per process and passed
//! explicitly to whatever needs the cache.
//!
//! # Session lifecycle
//!
//! ```text
//! from_options ──► authenticate(user, remote) ──► ... ──► logout()
//!                   │ attach remote                        │ cancel session token
//!                   │ migrate device-only entries           │ wait for sync task
//!                   │ start periodic sync                   │ flush pending writes
//!                                                           │ detach remote
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument, warn};

use crate::adapters::{
    BroadcastEventPublisher, CompositeEventPublisher, TracingEventPublisher,
    DEFAULT_EVENT_CAPACITY,
};
use crate::cache::{LocalTier, MemoryTier, UnifiedCache};
use crate::config::CacheOptions;
use crate::domain::{CacheEvent, EventPublisher, TierStore};
use crate::error::Result;
use crate::migrator::{MigrationConfig, MigrationCoordinator, MigrationRecord};
use crate::sync::{SyncReconciler, SyncState};

/// An authenticated user's attachment to the remote tier
struct Session {
    user_id: String,
    remote: Arc<dyn TierStore>,
    token: CancellationToken,
}

/// Process-wide cache facade
pub struct CacheService {
    options: CacheOptions,
    cache: Arc<UnifiedCache>,
    events: Arc<BroadcastEventPublisher>,
    migrator: Option<Arc<MigrationCoordinator>>,
    reconciler: Option<Arc<SyncReconciler>>,
    session: Mutex<Option<Session>>,
    /// Periodic sync loops of the current session
    tasks: TaskTracker,
}

impl CacheService {
    /// Build the tiers, event channel and coordinators from options
    pub async fn from_options(options: CacheOptions) -> Result<Self> {
        options.validate()?;

        let memory = Arc::new(MemoryTier::with_config(options.memory_config()));
        let local: Option<Arc<dyn TierStore>> = if options.use_local_storage {
            Some(Arc::new(LocalTier::open(options.local_config()).await?))
        } else {
            None
        };

        let events = Arc::new(BroadcastEventPublisher::new(DEFAULT_EVENT_CAPACITY));
        let publisher: Arc<dyn EventPublisher> = Arc::new(
            CompositeEventPublisher::new()
                .with_shared(events.clone())
                .with_publisher(TracingEventPublisher::new()),
        );

        let cache = Arc::new(UnifiedCache::new(
            &options,
            memory,
            local.clone(),
            publisher.clone(),
        ));

        let migrator = local.as_ref().map(|local| {
            MigrationCoordinator::new(
                MigrationConfig {
                    resolver: cache.resolver().clone(),
                    ..MigrationConfig::from(&options)
                },
                local.clone(),
                publisher.clone(),
                cache.metrics().clone(),
            )
        });
        let reconciler = local
            .as_ref()
            .map(|_| SyncReconciler::new(cache.clone()));

        info!(
            local = options.use_local_storage,
            remote = options.use_remote_store,
            auto_sync = options.auto_sync,
            migration = options.migration_enabled,
            "Cache service initialised"
        );

        Ok(Self {
            options,
            cache,
            events,
            migrator,
            reconciler,
            session: Mutex::new(None),
            tasks: TaskTracker::new(),
        })
    }

    /// The unified cache
    pub fn cache(&self) -> &Arc<UnifiedCache> {
        &self.cache
    }

    /// Options the service was built from
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Migration coordinator, absent without a local tier
    pub fn migrator(&self) -> Option<&Arc<MigrationCoordinator>> {
        self.migrator.as_ref()
    }

    /// Sync reconciler, absent without a local tier
    pub fn reconciler(&self) -> Option<&Arc<SyncReconciler>> {
        self.reconciler.as_ref()
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// User of the current session
    pub fn current_user(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.user_id.clone())
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Start a session for `user_id` backed by `remote`
    ///
    /// Returns the migration record when a migration ran.
    #[instrument(skip(self, remote))]
    pub async fn authenticate(
        &self,
        user_id: &str,
        remote: Arc<dyn TierStore>,
    ) -> Result<Option<MigrationRecord>> {
        if self.current_user().is_some() {
            self.logout().await;
        }

        let token = CancellationToken::new();
        self.cache.attach_remote(remote.clone());
        *self.session.lock() = Some(Session {
            user_id: user_id.to_string(),
            remote: remote.clone(),
            token: token.clone(),
        });
        info!("Session started");

        if !self.options.use_remote_store {
            return Ok(None);
        }

        let record = match (&self.migrator, self.options.migration_enabled) {
            (Some(migrator), true) => {
                // Entries written before login must be on disk before listing
                self.cache.flush().await;
                let record = migrator
                    .start_migration(user_id, remote.clone(), token.child_token())
                    .await?;
                Some(record)
            }
            _ => None,
        };

        if self.options.auto_sync {
            if let Some(reconciler) = &self.reconciler {
                self.tasks.spawn(reconciler.clone().run_periodic(
                    user_id.to_string(),
                    remote,
                    self.options.sync_interval(),
                    token,
                ));
            }
        }

        Ok(record)
    }

    /// Reconcile in the background after the network comes back
    pub fn connectivity_restored(&self) -> Option<JoinHandle<Result<SyncState>>> {
        let reconciler = self.reconciler.as_ref()?;
        if !self.options.use_remote_store {
            return None;
        }
        let session = self.session.lock();
        let session = session.as_ref()?;
        info!(user_id = %session.user_id, "Connectivity restored, reconciling");
        Some(reconciler.spawn_reconcile(
            &session.user_id,
            session.remote.clone(),
            session.token.clone(),
        ))
    }

    /// End the current session
    ///
    /// Returns false when no session was active.
    pub async fn logout(&self) -> bool {
        let Some(session) = self.session.lock().take() else {
            return false;
        };

        session.token.cancel();
        if let Some(reconciler) = &self.reconciler {
            reconciler.cancel(&session.user_id);
        }
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();

        self.cache.flush().await;
        if self.cache.detach_remote().is_none() {
            warn!(user_id = %session.user_id, "Session had no remote attached");
        }
        info!(user_id = %session.user_id, "Session ended");
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
