//! Cache Events
//!
//! Typed notifications emitted by the cache, migration and sync layers.
//! Subscribers receive these through an [`EventPublisher`](super::ports::EventPublisher)
//! rather than string-named callbacks, so payload shapes are known statically.
//!
//! # Example
//!
//! ```ignore
//! let mut rx = service.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     if let CacheEvent::AuthRequired { .. } = event {
//!         prompt_login();
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ports::Tier;

/// Why an entry left a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Byte budget or quota pressure
    Capacity,
    /// TTL elapsed
    Expired,
    /// Explicit invalidate call
    Invalidated,
}

/// Event representing a significant occurrence in the cache layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    // =========================================================================
    // Entry Events
    // =========================================================================
    /// A value found in a slower tier was copied into a faster one.
    EntryPromoted {
        key: String,
        from: Tier,
        to: Tier,
        timestamp: DateTime<Utc>,
    },

    /// An entry was removed from a tier.
    EntryEvicted {
        key: String,
        tier: Tier,
        reason: EvictionReason,
        timestamp: DateTime<Utc>,
    },

    /// A background write to a tier failed after retries.
    TierWriteFailed {
        key: String,
        tier: Tier,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// The remote tier rejected the session.
    AuthRequired {
        tier: Tier,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Migration Events
    // =========================================================================
    /// A local-to-remote migration started.
    MigrationStarted {
        user_id: String,
        migration_id: String,
        item_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A migration attempted every chunk.
    MigrationCompleted {
        user_id: String,
        migration_id: String,
        migrated: u64,
        failed: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Some keys in a migration chunk could not be uploaded.
    MigrationPartialFailure {
        user_id: String,
        migration_id: String,
        failed_keys: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A migration was aborted (auth failure or cancellation).
    MigrationFailed {
        user_id: String,
        migration_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Sync Events
    // =========================================================================
    /// A reconciliation pass finished.
    SyncCompleted {
        user_id: String,
        pushed: usize,
        pulled: usize,
        conflicts: u64,
        pending: u64,
        timestamp: DateTime<Utc>,
    },

    /// A reconciliation pass was cancelled or superseded.
    SyncCancelled {
        user_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl CacheEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CacheEvent::EntryPromoted { timestamp, .. } => *timestamp,
            CacheEvent::EntryEvicted { timestamp, .. } => *timestamp,
            CacheEvent::TierWriteFailed { timestamp, .. } => *timestamp,
            CacheEvent::AuthRequired { timestamp, .. } => *timestamp,
            CacheEvent::MigrationStarted { timestamp, .. } => *timestamp,
            CacheEvent::MigrationCompleted { timestamp, .. } => *timestamp,
            CacheEvent::MigrationPartialFailure { timestamp, .. } => *timestamp,
            CacheEvent::MigrationFailed { timestamp, .. } => *timestamp,
            CacheEvent::SyncCompleted { timestamp, .. } => *timestamp,
            CacheEvent::SyncCancelled { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::EntryPromoted { .. } => "EntryPromoted",
            CacheEvent::EntryEvicted { .. } => "EntryEvicted",
            CacheEvent::TierWriteFailed { .. } => "TierWriteFailed",
            CacheEvent::AuthRequired { .. } => "AuthRequired",
            CacheEvent::MigrationStarted { .. } => "MigrationStarted",
            CacheEvent::MigrationCompleted { .. } => "MigrationCompleted",
            CacheEvent::MigrationPartialFailure { .. } => "MigrationPartialFailure",
            CacheEvent::MigrationFailed { .. } => "MigrationFailed",
            CacheEvent::SyncCompleted { .. } => "SyncCompleted",
            CacheEvent::SyncCancelled { .. } => "SyncCancelled",
        }
    }

    /// Get the user ID if the event is scoped to a user.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            CacheEvent::MigrationStarted { user_id, .. }
            | CacheEvent::MigrationCompleted { user_id, .. }
            | CacheEvent::MigrationPartialFailure { user_id, .. }
            | CacheEvent::MigrationFailed { user_id, .. }
            | CacheEvent::SyncCompleted { user_id, .. }
            | CacheEvent::SyncCancelled { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    /// Whether the application should surface this to the user.
    ///
    /// Only re-authentication and partial migration failures are user-visible;
    /// everything else degrades silently.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            CacheEvent::AuthRequired { .. } | CacheEvent::MigrationPartialFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_and_user() {
        let event = CacheEvent::SyncCancelled {
            user_id: "user-1".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type(), "SyncCancelled");
        assert_eq!(event.user_id(), Some("user-1"));

        let event = CacheEvent::EntryPromoted {
            key: "k".to_string(),
            from: Tier::Remote,
            to: Tier::Memory,
            timestamp: Utc::now(),
        };
        assert_eq!(event.user_id(), None);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = CacheEvent::AuthRequired {
            tier: Tier::Remote,
            reason: "token expired".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "AuthRequired");
        assert_eq!(json["tier"], "remote");
    }

    #[test]
    fn test_user_visible_events() {
        let auth = CacheEvent::AuthRequired {
            tier: Tier::Remote,
            reason: "expired".to_string(),
            timestamp: Utc::now(),
        };
        let evicted = CacheEvent::EntryEvicted {
            key: "k".to_string(),
            tier: Tier::Memory,
            reason: EvictionReason::Capacity,
            timestamp: Utc::now(),
        };
        assert!(auth.is_user_visible());
        assert!(!evicted.is_user_visible());
    }
}
