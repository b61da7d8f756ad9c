//! Otakon Cache - Unified Multi-Tier Client Cache
//!
//! A client-side cache spread over three tiers of increasing latency and
//! durability: a bounded in-process memory tier, a quota-limited local tier
//! and a per-user remote tier. Reads fall through the tiers and promote hits;
//! writes fan out to every tier the content type's policy allows.
//!
//! # Architecture
//!
//! ```text
//! CacheService ─┬─► UnifiedCache ──► Memory → Local → Remote
//!               ├─► MigrationCoordinator  (device-only → remote on login)
//!               └─► SyncReconciler        (last-write-wins after offline)
//! ```
//!
//! # Features
//!
//! - Per-content-type TTL and tier eligibility
//! - LRU eviction under memory budget and local quota
//! - Near-duplicate query lookup for AI responses
//! - Idempotent, resumable migration on first login
//! - Offline reconciliation with cancellation
//! - Typed event channel
//!
//! # Modules
//!
//! - [`adapters`] - Remote tier and event publisher implementations
//! - [`cache`] - Entries, policies, tiers and the unified cache
//! - [`config`] - YAML-backed options
//! - [`domain`] - Ports and events
//! - [`error`] - Error types
//! - [`migrator`] - Local to remote migration
//! - [`service`] - Session orchestration
//! - [`sync`] - Local/remote reconciliation

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod migrator;
pub mod service;
pub mod sync;

// Re-export commonly used types
pub use cache::{CacheEntry, ContentType, Invalidation, UnifiedCache};
pub use config::CacheOptions;
pub use domain::{CacheEvent, Tier, TierStore};
pub use error::{Error, Result};
pub use migrator::{MigrationCoordinator, MigrationRecord, MigrationStatus};
pub use service::CacheService;
pub use sync::{SyncReconciler, SyncState};
