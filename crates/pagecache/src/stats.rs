//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for tier traffic and persistence health
#[derive(Debug, Default)]
pub struct CacheStats {
    keep_alive_hits: AtomicU64,
    bounded_hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    decode_failures: AtomicU64,
    cross_run_resets: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Restores served by the keep-alive tier
    pub keep_alive_hits: u64,
    /// Restores served by the bounded tier
    pub bounded_hits: u64,
    /// Restores served by pending writes or the persistent store
    pub store_hits: u64,
    /// Restores that found nothing
    pub misses: u64,
    /// Saves
    pub inserts: u64,
    /// Records pushed out of the bounded tier
    pub evictions: u64,
    /// Successful store writes
    pub persisted: u64,
    /// Failed store writes
    pub persist_failures: u64,
    /// Payloads that could not be decoded
    pub decode_failures: u64,
    /// Scroll anchors dropped because the record came from a previous run
    pub cross_run_resets: u64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_keep_alive_hit(&self) {
        self.keep_alive_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bounded_hit(&self) {
        self.bounded_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_hit(&self) {
        self.store_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cross_run_reset(&self) {
        self.cross_run_resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Total hits across all tiers
    pub fn hits(&self) -> u64 {
        self.keep_alive_hits.load(Ordering::Relaxed)
            + self.bounded_hits.load(Ordering::Relaxed)
            + self.store_hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get total failed store writes
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Copy every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            keep_alive_hits: self.keep_alive_hits.load(Ordering::Relaxed),
            bounded_hits: self.bounded_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            cross_run_resets: self.cross_run_resets.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.keep_alive_hits,
            &self.bounded_hits,
            &self.store_hits,
            &self.misses,
            &self.inserts,
            &self.evictions,
            &self.persisted,
            &self.persist_failures,
            &self.decode_failures,
            &self.cross_run_resets,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = CacheStats::new();

        stats.record_keep_alive_hit();
        stats.record_store_hit();
        stats.record_miss();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_snapshot() {
        let stats = CacheStats::new();

        stats.record_eviction();
        stats.record_persisted();
        stats.record_persist_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.persisted, 1);
        assert_eq!(snapshot.persist_failures, 1);
        assert_eq!(snapshot.bounded_hits, 0);
    }

    #[test]
    fn test_stats_reset() {
        let stats = CacheStats::new();

        stats.record_bounded_hit();
        stats.record_miss();
        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.hit_ratio(), 0.0);
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
