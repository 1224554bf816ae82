//! Rangecache - LRU-K Byte-Range Read Cache
//!
//! An in-memory cache of immutable byte ranges keyed by file identifier and
//! offset, with a two-tier LRU-K replacement policy and exactly-once eviction
//! notification.
//!
//! # Architecture
//!
//! ```text
//! index (AVL tree, intrusive list) → cache (entries, tiers, waiters)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - The read cache, its entries, waiters, configuration and metrics
//! - [`error`] - Error types
//! - [`index`] - Intrusive ordered index and recency list over arena handles

pub mod cache;
pub mod error;
pub mod index;

// Re-export commonly used types
pub use cache::{
    ByteRange, CacheMetrics, CacheStats, EvictionStatus, EvictionWaiter, FileId, QueryHit,
    ReadCache, ReadCacheConfig, Tier,
};
pub use error::{Error, Result};
