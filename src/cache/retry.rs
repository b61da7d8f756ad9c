//! Tier Failure Handling
//!
//! - Network errors: retried with exponential backoff, bounded attempts
//! - Quota errors: evict least-recently-used entries in that tier, retry once
//! - Auth errors: returned immediately

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::entry::CacheEntry;
use crate::domain::TierStore;
use crate::error::Result;

/// Backoff configuration for retryable tier errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying retryable errors according to `policy`
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying tier operation"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Write an entry to a tier with network retry and one eviction-backed retry on quota errors
///
/// Returns the keys evicted to make room (empty when no eviction was needed).
pub async fn write_with_eviction(
    store: &dyn TierStore,
    entry: CacheEntry,
    policy: &RetryPolicy,
) -> Result<Vec<String>> {
    let tier = store.tier();
    match retry(policy, "set", || store.set(entry.clone())).await {
        Ok(()) => Ok(Vec::new()),
        Err(e) if e.is_quota() => {
            let evicted = store.evict_lru(entry.size_bytes).await?;
            warn!(
                tier = %tier,
                key = %entry.key,
                evicted = evicted.len(),
                "Quota exceeded, evicted entries before retry"
            );
            retry(policy, "set", || store.set(entry.clone())).await?;
            Ok(evicted)
        }
        Err(e) => Err(e),
    }
}

// =============================================================================
// Tests
// =============================================================================
