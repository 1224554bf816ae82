//! Byte-Range Read Cache
//!
//! Two-tier LRU-K cache for immutable byte ranges of files.
//!
//! # Architecture
//!
//! ```text
//!              add / query / remove_range / register_for_eviction
//!                                  │
//!                                  ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           ReadCache                            │
//! │                                                                │
//! │   ┌───────────────┐   demote (2nd ref)   ┌───────────────┐     │
//! │   │  Burst tier   │ ───────────────────▶ │  LRU-K tier   │     │
//! │   │ (recency LRU) │ ◀─────────────────── │ (K-th touch)  │     │
//! │   └───────┬───────┘      re-touch        └───────┬───────┘     │
//! │           │ cold tail                            │ oldest      │
//! │           ▼                                      ▼             │
//! │        evicted ──────▶ Disposal ──────▶ waiters completed      │
//! └────────────────────────────────────────────────────────────────┘
//! ```

mod arena;
mod clock;
mod config;
mod entry;
mod metrics;
mod read_cache;
mod waiter;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    ReadCacheConfig, DEFAULT_CORRELATED_REFERENCE_TIMEOUT, DEFAULT_TARGET_BURST_CACHE_SIZE,
    DEFAULT_TOTAL_CACHE_SIZE,
};
pub use entry::{ByteRange, CacheEntry, FileId, Tier, TouchHistory, LRU_K};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use read_cache::{CacheStats, QueryHit, ReadCache, REMOVE_RANGE_BATCH};
pub use waiter::{EvictionCallback, EvictionStatus, EvictionWaiter};
