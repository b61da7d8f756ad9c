//! Cache Metrics Collection
//!
//! Counters for monitoring cache health across tiers and background work.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::Tier;

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
    write_failures: AtomicU64,
}

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    memory: TierCounters,
    local: TierCounters,
    remote: TierCounters,

    full_misses: AtomicU64,
    stale_reads: AtomicU64,
    promotions: AtomicU64,
    similar_hits: AtomicU64,
    invalidations: AtomicU64,

    migrations_completed: AtomicU64,
    migrated_items: AtomicU64,
    migration_failures: AtomicU64,

    reconciliations: AtomicU64,
    sync_conflicts: AtomicU64,
    sync_cancellations: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, tier: Tier) -> &TierCounters {
        match tier {
            Tier::Memory => &self.memory,
            Tier::Local => &self.local,
            Tier::Remote => &self.remote,
        }
    }

    pub fn record_hit(&self, tier: Tier) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, tier: Tier) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A tier read failed and was treated as a miss
    pub fn record_error(&self, tier: Tier) {
        self.tier(tier).errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, tier: Tier, count: usize) {
        self.tier(tier)
            .evictions
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self, tier: Tier) {
        self.tier(tier)
            .write_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// A read missed every probed tier
    pub fn record_full_miss(&self) {
        self.full_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_read(&self) {
        self.stale_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_similar_hit(&self) {
        self.similar_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: usize) {
        self.invalidations
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_migration(&self, migrated: u64, failed: usize) {
        self.migrations_completed.fetch_add(1, Ordering::Relaxed);
        self.migrated_items.fetch_add(migrated, Ordering::Relaxed);
        self.migration_failures
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn record_reconciliation(&self, conflicts: u64) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
        self.sync_conflicts.fetch_add(conflicts, Ordering::Relaxed);
    }

    pub fn record_sync_cancelled(&self) {
        self.sync_cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Hit ratio across all tiers (a request hitting any tier counts once)
    pub fn hit_ratio(&self) -> f64 {
        let snapshot = self.snapshot();
        let hits = snapshot.total_hits() as f64;
        let requests = hits + snapshot.full_misses as f64;
        if requests == 0.0 {
            0.0
        } else {
            hits / requests
        }
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tier = |c: &TierCounters| TierSnapshot {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
        };

        MetricsSnapshot {
            memory: tier(&self.memory),
            local: tier(&self.local),
            remote: tier(&self.remote),
            full_misses: self.full_misses.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            similar_hits: self.similar_hits.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            migrations_completed: self.migrations_completed.load(Ordering::Relaxed),
            migrated_items: self.migrated_items.load(Ordering::Relaxed),
            migration_failures: self.migration_failures.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
            sync_conflicts: self.sync_conflicts.load(Ordering::Relaxed),
            sync_cancellations: self.sync_cancellations.load(Ordering::Relaxed),
        }
    }
}

/// Per-tier counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub evictions: u64,
    pub write_failures: u64,
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub memory: TierSnapshot,
    pub local: TierSnapshot,
    pub remote: TierSnapshot,
    /// Reads that missed every probed tier
    pub full_misses: u64,
    pub stale_reads: u64,
    pub promotions: u64,
    pub similar_hits: u64,
    pub invalidations: u64,
    pub migrations_completed: u64,
    pub migrated_items: u64,
    pub migration_failures: u64,
    pub reconciliations: u64,
    pub sync_conflicts: u64,
    pub sync_cancellations: u64,
}

impl MetricsSnapshot {
    /// Snapshot for one tier
    pub fn tier(&self, tier: Tier) -> &TierSnapshot {
        match tier {
            Tier::Memory => &self.memory,
            Tier::Local => &self.local,
            Tier::Remote => &self.remote,
        }
    }

    /// Hits summed over every tier
    pub fn total_hits(&self) -> u64 {
        self.memory.hits + self.local.hits + self.remote.hits
    }
}
