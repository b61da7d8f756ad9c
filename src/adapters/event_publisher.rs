//! Event Publishers
//!
//! Sinks for [`CacheEvent`]s: structured logs, an in-process recorder, the
//! broadcast channel behind `CacheService::subscribe`, and a fan-out over
//! several of them.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::events::CacheEvent;
use crate::domain::ports::EventPublisher;
use crate::domain::Tier;
use crate::error::Result;

/// Default capacity of the subscription channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// =============================================================================
// Tracing
// =============================================================================

/// How loudly an event is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventSeverity {
    /// Per-entry churn: promotions, evictions, superseded passes
    Routine,
    /// Session milestones: migration and sync progress
    Milestone,
    /// Something the app or user has to act on
    Attention,
}

impl EventSeverity {
    /// Severity of a cache event
    pub fn of(event: &CacheEvent) -> Self {
        match event {
            CacheEvent::AuthRequired { .. }
            | CacheEvent::TierWriteFailed { .. }
            | CacheEvent::MigrationPartialFailure { .. }
            | CacheEvent::MigrationFailed { .. } => EventSeverity::Attention,
            CacheEvent::MigrationStarted { .. }
            | CacheEvent::MigrationCompleted { .. }
            | CacheEvent::SyncCompleted { .. } => EventSeverity::Milestone,
            CacheEvent::EntryPromoted { .. }
            | CacheEvent::EntryEvicted { .. }
            | CacheEvent::SyncCancelled { .. } => EventSeverity::Routine,
        }
    }
}

/// Key an entry-scoped event refers to
fn event_key(event: &CacheEvent) -> Option<&str> {
    match event {
        CacheEvent::EntryPromoted { key, .. }
        | CacheEvent::EntryEvicted { key, .. }
        | CacheEvent::TierWriteFailed { key, .. } => Some(key),
        _ => None,
    }
}

/// Writes cache events to `tracing` as structured fields.
///
/// Attention events log at warn, milestones at info and routine churn at
/// debug. Routine events can be dropped entirely for noisy sessions.
#[derive(Debug, Clone)]
pub struct TracingEventPublisher {
    routine: bool,
}

impl Default for TracingEventPublisher {
    fn default() -> Self {
        Self { routine: true }
    }
}

impl TracingEventPublisher {
    /// Log every event
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip promotions, evictions and cancelled passes
    pub fn without_routine() -> Self {
        Self { routine: false }
    }

    /// Whether `event` would be logged
    pub fn logs(&self, event: &CacheEvent) -> bool {
        self.routine || EventSeverity::of(event) > EventSeverity::Routine
    }
}

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: CacheEvent) -> Result<()> {
        if !self.logs(&event) {
            return Ok(());
        }
        let event_type = event.event_type();
        let user_id = event.user_id().unwrap_or("-");
        let key = event_key(&event).unwrap_or("-");

        match EventSeverity::of(&event) {
            EventSeverity::Attention => {
                warn!(event_type, user_id, key, detail = ?event, "Cache needs attention")
            }
            EventSeverity::Milestone => {
                info!(event_type, user_id, detail = ?event, "Cache milestone")
            }
            EventSeverity::Routine => debug!(event_type, key, "Cache activity"),
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<CacheEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Recording
// =============================================================================

/// Keeps every published event in order, for assertions and diagnostics
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<CacheEvent>>,
}

impl EventRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    /// Events with the given type tag, e.g. `"SyncCompleted"`
    pub fn of_type(&self, event_type: &str) -> Vec<CacheEvent> {
        self.matching(|e| e.event_type() == event_type)
    }

    /// Migration and sync events for one user
    pub fn for_user(&self, user_id: &str) -> Vec<CacheEvent> {
        self.matching(|e| e.user_id() == Some(user_id))
    }

    /// Keys evicted from `tier`, oldest first
    pub fn evicted_from(&self, tier: Tier) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CacheEvent::EntryEvicted { key, tier: t, .. } if *t == tier => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn matching(&self, pred: impl Fn(&CacheEvent) -> bool) -> Vec<CacheEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for EventRecorder {
    async fn publish(&self, event: CacheEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<CacheEvent>) -> Result<()> {
        self.events.lock().extend(events);
        Ok(())
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Broadcast publisher backing application subscriptions.
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// the cache. Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<CacheEvent>,
}

impl BroadcastEventPublisher {
    /// Create a channel buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: CacheEvent) -> Result<()> {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<CacheEvent>) -> Result<()> {
        for event in events {
            let _ = self.sender.send(event);
        }
        Ok(())
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Forwards every event to each inner publisher in order
#[derive(Default)]
pub struct CompositeEventPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl CompositeEventPublisher {
    /// Create a new composite publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a publisher to the composite.
    pub fn with_publisher<P: EventPublisher + 'static>(self, publisher: P) -> Self {
        self.with_shared(Arc::new(publisher))
    }

    /// Add a publisher that is also held elsewhere.
    pub fn with_shared(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }
}

impl std::fmt::Debug for CompositeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeEventPublisher")
            .field("publisher_count", &self.publishers.len())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(&self, event: CacheEvent) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish(event.clone()).await?;
        }
        Ok(())
    }

    async fn publish_all(&self, events: Vec<CacheEvent>) -> Result<()> {
        for publisher in &self.publishers {
            publisher.publish_all(events.clone()).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EvictionReason;
    use chrono::Utc;

    fn auth_required() -> CacheEvent {
        CacheEvent::AuthRequired {
            tier: Tier::Remote,
            reason: "token expired".to_string(),
            timestamp: Utc::now(),
        }
    }

    fn sync_cancelled(user: &str) -> CacheEvent {
        CacheEvent::SyncCancelled {
            user_id: user.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn evicted(key: &str, tier: Tier) -> CacheEvent {
        CacheEvent::EntryEvicted {
            key: key.to_string(),
            tier,
            reason: EvictionReason::Capacity,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_severity_follows_what_the_app_must_handle() {
        assert_eq!(EventSeverity::of(&auth_required()), EventSeverity::Attention);
        assert_eq!(
            EventSeverity::of(&CacheEvent::SyncCompleted {
                user_id: "u1".into(),
                pushed: 1,
                pulled: 0,
                conflicts: 0,
                pending: 0,
                timestamp: Utc::now(),
            }),
            EventSeverity::Milestone
        );
        assert_eq!(
            EventSeverity::of(&evicted("k", Tier::Local)),
            EventSeverity::Routine
        );
        // Everything user-visible is at least attention-worthy
        assert!(auth_required().is_user_visible());
    }

    #[tokio::test]
    async fn test_tracing_publisher_can_drop_routine_events() {
        let quiet = TracingEventPublisher::without_routine();
        assert!(!quiet.logs(&evicted("k", Tier::Memory)));
        assert!(quiet.logs(&auth_required()));
        assert!(TracingEventPublisher::new().logs(&sync_cancelled("u1")));

        quiet
            .publish_all(vec![auth_required(), sync_cancelled("u1")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recorder_queries() {
        let recorder = EventRecorder::new();
        assert!(recorder.is_empty());

        recorder.publish(sync_cancelled("u1")).await.unwrap();
        recorder
            .publish_all(vec![
                sync_cancelled("u2"),
                evicted("a", Tier::Local),
                evicted("b", Tier::Memory),
                evicted("c", Tier::Local),
            ])
            .await
            .unwrap();

        assert_eq!(recorder.len(), 5);
        assert_eq!(recorder.of_type("SyncCancelled").len(), 2);
        assert_eq!(recorder.for_user("u2").len(), 1);
        assert_eq!(recorder.evicted_from(Tier::Local), vec!["a", "c"]);

        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_publisher_delivers_to_subscribers() {
        let publisher = BroadcastEventPublisher::new(8);
        // No subscribers yet: dropped silently
        publisher.publish(sync_cancelled("early")).await.unwrap();

        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);
        publisher.publish(auth_required()).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "AuthRequired");
    }

    #[tokio::test]
    async fn test_composite_forwards_to_every_sink() {
        let first = Arc::new(EventRecorder::new());
        let second = Arc::new(EventRecorder::new());

        let composite = CompositeEventPublisher::new()
            .with_shared(first.clone())
            .with_shared(second.clone())
            .with_publisher(TracingEventPublisher::without_routine());

        composite
            .publish_all(vec![sync_cancelled("u1"), auth_required()])
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.of_type("AuthRequired").len(), 1);
    }
}
