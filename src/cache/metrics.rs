//! Read Cache Metrics
//!
//! Lock-free counters updated alongside cache operations, readable at any
//! time without taking the cache lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Read cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookups
    query_hits: AtomicU64,
    query_misses: AtomicU64,

    // Population
    adds: AtomicU64,
    superseded: AtomicU64,

    // Replacement
    cold_evictions: AtomicU64,
    lru_k_evictions: AtomicU64,
    demotions: AtomicU64,
    promotions: AtomicU64,
    suppressed_touches: AtomicU64,

    // Invalidation
    invalidated: AtomicU64,

    // Waiters
    waiters_evicted: AtomicU64,
    waiters_canceled: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.query_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.query_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_add(&self) {
        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    /// Entries dropped because a newer overlapping range was added
    pub fn record_superseded(&self, count: u64) {
        self.superseded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_cold_eviction(&self) {
        self.cold_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lru_k_eviction(&self) {
        self.lru_k_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Burst tail moved into the LRU-K tier
    pub fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    /// LRU-K entry touched and moved back into the burst tier
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed_touch(&self) {
        self.suppressed_touches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidated(&self, count: u64) {
        self.invalidated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_waiter_evicted(&self) {
        self.waiters_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_waiter_canceled(&self) {
        self.waiters_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.query_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.query_misses.load(Ordering::Relaxed)
    }

    /// Query hit ratio (0.0 when nothing was queried)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Total entries evicted by capacity enforcement
    pub fn evictions(&self) -> u64 {
        self.cold_evictions.load(Ordering::Relaxed) + self.lru_k_evictions.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            query_hits: self.hits(),
            query_misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            adds: self.adds.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            cold_evictions: self.cold_evictions.load(Ordering::Relaxed),
            lru_k_evictions: self.lru_k_evictions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            suppressed_touches: self.suppressed_touches.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            waiters_evicted: self.waiters_evicted.load(Ordering::Relaxed),
            waiters_canceled: self.waiters_canceled.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.query_hits,
            &self.query_misses,
            &self.adds,
            &self.superseded,
            &self.cold_evictions,
            &self.lru_k_evictions,
            &self.demotions,
            &self.promotions,
            &self.suppressed_touches,
            &self.invalidated,
            &self.waiters_evicted,
            &self.waiters_canceled,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub query_hits: u64,
    pub query_misses: u64,
    pub hit_ratio: f64,
    pub adds: u64,
    pub superseded: u64,
    pub cold_evictions: u64,
    pub lru_k_evictions: u64,
    pub demotions: u64,
    pub promotions: u64,
    pub suppressed_touches: u64,
    pub invalidated: u64,
    pub waiters_evicted: u64,
    pub waiters_canceled: u64,
}

// =============================================================================
// Tests
// =============================================================================
