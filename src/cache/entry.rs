//! Cache Entry Types
//!
//! The unit of storage shared by every tier, plus the closed set of content
//! types that drive policy resolution.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Tier;
use crate::error::Error;

/// Prefix for coordinator bookkeeping keys (migration flags, sync state).
///
/// Reserved keys are never migrated, reconciled, evicted for quota or matched
/// by prefix invalidation.
pub const RESERVED_PREFIX: &str = "__meta/";

/// Lifetime given to bookkeeping entries.
const METADATA_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Check whether a key belongs to the reserved bookkeeping namespace
#[inline]
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Kind of content being cached; selects TTL and tier placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Daily gaming news digest
    DailyNews,
    /// Content shared by all users (featured games, announcements)
    GlobalContent,
    /// Per-game hints and walkthrough answers
    GameHelp,
    /// Raw AI completions keyed by prompt
    AiResponse,
    /// Anything without a dedicated policy
    Default,
}

impl ContentType {
    /// Every content type with a dedicated policy row.
    pub const ALL: [ContentType; 5] = [
        ContentType::DailyNews,
        ContentType::GlobalContent,
        ContentType::GameHelp,
        ContentType::AiResponse,
        ContentType::Default,
    ];

    /// Wire tag for this content type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::DailyNews => "daily_news",
            ContentType::GlobalContent => "global_content",
            ContentType::GameHelp => "game_help",
            ContentType::AiResponse => "ai_response",
            ContentType::Default => "default",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentType::ALL
            .into_iter()
            .find(|ct| ct.as_str() == s)
            .ok_or_else(|| Error::UnknownContentType(s.to_string()))
    }
}

/// A cached value with its lifetime metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Cached JSON value
    pub value: Value,
    /// Content type the entry was written under
    pub content_type: ContentType,
    /// Write timestamp (last-write-wins clock)
    pub created_at: DateTime<Utc>,
    /// Instant after which the entry is stale
    pub expires_at: DateTime<Utc>,
    /// Tier currently holding this copy
    pub tier: Tier,
    /// Approximate footprint (key + serialized value)
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Create an entry written now that lives for `ttl`.
    pub fn new(
        key: impl Into<String>,
        value: Value,
        content_type: ContentType,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = expiry_after(created_at, ttl);
        Self::with_timestamps(key, value, content_type, created_at, expires_at)
    }

    /// Create an entry with explicit timestamps.
    ///
    /// `expires_at` is clamped so it never precedes `created_at`.
    pub fn with_timestamps(
        key: impl Into<String>,
        value: Value,
        content_type: ContentType,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let key = key.into();
        let size_bytes = Self::compute_size(&key, &value);
        Self {
            key,
            value,
            content_type,
            created_at,
            expires_at: expires_at.max(created_at),
            tier: Tier::Memory,
            size_bytes,
        }
    }

    /// Create a long-lived bookkeeping entry under the reserved namespace.
    pub fn metadata(key: impl Into<String>, value: Value) -> Self {
        Self::new(key, value, ContentType::Default, METADATA_TTL)
    }

    /// Tag this copy with the tier holding it.
    pub fn in_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a given instant
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left before the entry goes stale (zero if already stale)
    pub fn remaining_ttl(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Check whether this entry is coordinator bookkeeping
    pub fn is_reserved(&self) -> bool {
        is_reserved_key(&self.key)
    }

    fn compute_size(key: &str, value: &Value) -> u64 {
        let value_len = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
        (key.len() + value_len) as u64
    }
}

/// Compute `created_at + ttl`, saturating instead of overflowing.
pub(crate) fn expiry_after(created_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| created_at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// =============================================================================
// Tests
// =============================================================================
