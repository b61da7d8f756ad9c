//! Three-Tier Client Cache
//!
//! Memory, local device storage and a remote per-user store behind one
//! get/set surface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           Unified Cache                                  │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Memory Tier          │ Local Tier           │ Remote Tier               │
//! │  ┌────────────────┐   │ ┌────────────────┐   │ ┌────────────────────┐    │
//! │  │ LRU map        │   │ │ JSON per key   │   │ │ REST table         │    │
//! │  │ byte budget    │   │ │ byte quota     │   │ │ per-user rows      │    │
//! │  │ volatile       │   │ │ survives reload│   │ │ authenticated only │    │
//! │  └────────────────┘   │ └────────────────┘   │ └────────────────────┘    │
//! │         ▲             │         ▲            │           │               │
//! │         └─────────────┴─────────┴────────────┴───────────┘               │
//! │                       promotion on slow-tier hit                         │
//! │                                                                          │
//! │          Strategy resolver: content type → TTL + eligible tiers          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - A tier failing never fails a read; it degrades to a miss
//! - Writes acknowledge after the fastest eligible tier
//! - Keys under [`RESERVED_PREFIX`] are bookkeeping and never evicted

mod entry;
mod local;
mod lru;
mod manager;
mod memory;
mod metrics;
mod policy;
mod retry;
mod similarity;

pub use entry::{is_reserved_key, CacheEntry, ContentType, RESERVED_PREFIX};
pub use local::{LocalTier, LocalTierConfig};
pub use manager::{Invalidation, UnifiedCache};
pub use memory::{InsertOutcome, MemoryTier, MemoryTierConfig};
pub use metrics::{CacheMetrics, MetricsSnapshot, TierSnapshot};
pub use policy::{CacheStrategyResolver, ContentTypePolicy, DEFAULT_SIMILARITY_THRESHOLD};
pub use retry::{retry, write_with_eviction, RetryPolicy};
pub use similarity::{similarity, tokenize, SimilarMatch, SimilarityIndex};

/// Default memory tier budget (32MB)
pub const DEFAULT_MEMORY_BUDGET: u64 = 32 * 1024 * 1024;

/// Default local tier quota (5MB, typical browser storage limit)
pub const DEFAULT_LOCAL_QUOTA: u64 = 5 * 1024 * 1024;

/// Default namespace prefix for persisted local entries
pub const DEFAULT_KEY_PREFIX: &str = "otakon_";
