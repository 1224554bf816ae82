//! LRU-K Byte-Range Read Cache
//!
//! Caches immutable byte ranges of files and decides what to keep with a
//! two-tier LRU-K policy.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        ReadCache (one Mutex)                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  EntryArena ── CacheEntry { range_links, recency_links, lru_k_links } │
//! │                                                                      │
//! │  Range index (AVL)        every live entry, overlap == equal         │
//! │  Recency list (burst)     MRU ... LRU, unproven entries              │
//! │  LRU-K index (AVL)        long-term entries by K-th recent touch     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Replacement
//!
//! New entries enter the burst tier. While either budget is exceeded the
//! burst tail is examined: an entry never referenced a second time is
//! evicted, a proven one is demoted to the LRU-K tier. Once the burst tier is
//! within target, the LRU-K entry with the oldest K-th most recent touch is
//! evicted. Touching an LRU-K entry moves it back to the burst tier.
//!
//! Removed entries and waiter completions are collected in a disposal list
//! and handled after the lock is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use super::arena::{EntryArena, EntryId, LruKAdapter, RangeAdapter, RecencyAdapter};
use super::clock::{Clock, MonotonicClock};
use super::config::{validate_sizes, ReadCacheConfig};
use super::entry::{ByteRange, CacheEntry, FileId, Tier, LRU_K};
use super::metrics::CacheMetrics;
use super::waiter::{Disposal, EvictionCallback, EvictionStatus, EvictionWaiter};
use crate::error::{Error, Result};
use crate::index::{OrderedIndex, RecencyList};

/// `remove_range` and `clear` release the lock after this many removals
pub const REMOVE_RANGE_BATCH: usize = 64;

/// Source of per-instance cache ids, stamped on the waiters each cache allocates
static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

#[cold]
#[track_caller]
fn corrupt(what: &str) -> ! {
    panic!("read cache corrupted: {what}")
}

/// Result of a successful [`ReadCache::query`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHit {
    /// Start offset of the cached range covering the queried offset
    pub offset: u64,
    /// The whole cached range
    pub data: Bytes,
}

/// Point-in-time sizes and counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_cache_size: u64,
    pub target_burst_cache_size: u64,
    pub current_cache_size: u64,
    pub current_burst_cache_size: u64,
    pub entries: usize,
    pub burst_entries: usize,
    pub lru_k_entries: usize,
}

/// Everything guarded by the cache lock
struct CacheState {
    entries: EntryArena,
    ranges: OrderedIndex<RangeAdapter>,
    lru_k: OrderedIndex<LruKAdapter>,
    recency: RecencyList<RecencyAdapter>,
    total_cache_size: u64,
    target_burst_cache_size: u64,
    current_cache_size: u64,
    current_burst_cache_size: u64,
    touch_sequence: u64,
}

impl CacheState {
    fn new(config: &ReadCacheConfig) -> Self {
        Self {
            entries: EntryArena::new(),
            ranges: OrderedIndex::new(RangeAdapter),
            lru_k: OrderedIndex::new(LruKAdapter),
            recency: RecencyList::new(RecencyAdapter),
            total_cache_size: config.total_cache_size,
            target_burst_cache_size: config.target_burst_cache_size,
            current_cache_size: 0,
            current_burst_cache_size: 0,
            touch_sequence: 0,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.touch_sequence += 1;
        self.touch_sequence
    }

    /// Insert a new entry, superseding every entry it overlaps
    fn add(
        &mut self,
        range: ByteRange,
        data: Bytes,
        now_ms: u64,
        disposal: &mut Disposal,
        metrics: &CacheMetrics,
    ) -> Result<()> {
        // Allocate first: on failure nothing has been touched.
        let id = self.entries.insert(CacheEntry::new(range, data))?;

        let mut superseded = 0u64;
        while let Some(old) = self.ranges.lookup(&self.entries, &range) {
            disposal.retire(self.unlink(old));
            superseded += 1;
        }
        if superseded > 0 {
            debug!(file_id = %range.file_id, offset = range.offset, superseded, "Superseded overlapping ranges");
            metrics.record_superseded(superseded);
        }

        if !self.ranges.insert(&mut self.entries, id) {
            corrupt("overlap remained after superseding");
        }
        let sequence = self.next_sequence();
        self.entries.get_mut(id).history.record(sequence, now_ms);
        self.recency.push_front(&mut self.entries, id);

        self.current_cache_size += range.length;
        self.current_burst_cache_size += range.length;
        metrics.record_add();
        Ok(())
    }

    /// Record a reference to `id`. Returns `false` when suppressed as correlated.
    fn touch(
        &mut self,
        id: EntryId,
        now_ms: u64,
        timeout_ms: u64,
        bypass: bool,
        metrics: &CacheMetrics,
    ) -> bool {
        let entry = self.entries.get(id);
        if !bypass && entry.history.is_correlated(now_ms, timeout_ms) {
            trace!(entry = ?id, "Suppressed correlated reference");
            metrics.record_suppressed_touch();
            return false;
        }

        let tier = entry.tier;
        // The ring is the LRU-K key: leave the index before changing it.
        if tier == Tier::LongTerm && !self.lru_k.remove(&mut self.entries, id) {
            corrupt("long-term entry missing from LRU-K index");
        }

        let sequence = self.next_sequence();
        let entry = self.entries.get_mut(id);
        entry.history.record(sequence, now_ms);
        let length = entry.length();

        match tier {
            Tier::Burst => self.recency.move_to_front(&mut self.entries, id),
            Tier::LongTerm => {
                self.entries.get_mut(id).tier = Tier::Burst;
                self.recency.push_front(&mut self.entries, id);
                self.current_burst_cache_size += length;
                metrics.record_promotion();
            }
        }
        trace!(entry = ?id, sequence, "Recorded touch");
        true
    }

    /// Fill every history slot so the entry ranks as recently as possible
    fn warm(&mut self, id: EntryId, now_ms: u64, metrics: &CacheMetrics) {
        for _ in 0..LRU_K {
            self.touch(id, now_ms, 0, true, metrics);
        }
    }

    /// Detach `id` from every structure and take it out of the arena
    fn unlink(&mut self, id: EntryId) -> CacheEntry {
        self.ranges.remove(&mut self.entries, id);

        let entry = self.entries.get(id);
        let length = entry.length();
        match entry.tier {
            Tier::Burst => {
                self.recency.remove(&mut self.entries, id);
                self.current_burst_cache_size = self
                    .current_burst_cache_size
                    .checked_sub(length)
                    .unwrap_or_else(|| corrupt("burst usage underflow"));
            }
            Tier::LongTerm => {
                self.lru_k.remove(&mut self.entries, id);
            }
        }
        self.current_cache_size = self
            .current_cache_size
            .checked_sub(length)
            .unwrap_or_else(|| corrupt("total usage underflow"));

        self.entries.remove(id)
    }

    /// Move the burst entry `id` into the LRU-K tier
    fn demote(&mut self, id: EntryId) {
        self.recency.remove(&mut self.entries, id);
        let entry = self.entries.get_mut(id);
        entry.tier = Tier::LongTerm;
        let length = entry.length();
        self.current_burst_cache_size = self
            .current_burst_cache_size
            .checked_sub(length)
            .unwrap_or_else(|| corrupt("burst usage underflow"));
        if !self.lru_k.insert(&mut self.entries, id) {
            corrupt("duplicate LRU-K key");
        }
    }

    /// Evict and demote until both budgets are respected
    fn adjust_cache_usage(&mut self, disposal: &mut Disposal, metrics: &CacheMetrics) {
        loop {
            let over_total = self.current_cache_size > self.total_cache_size;
            let over_burst = self.current_burst_cache_size > self.target_burst_cache_size;
            if !over_total && !over_burst {
                break;
            }

            if over_burst {
                let Some(tail) = self.recency.back() else {
                    corrupt("burst usage without burst entries");
                };
                let entry = self.entries.get(tail);
                if entry.history.is_cold() {
                    debug!(file_id = %entry.file_id(), offset = entry.offset(), length = entry.length(), "Evicting cold burst entry");
                    disposal.retire(self.unlink(tail));
                    metrics.record_cold_eviction();
                } else {
                    debug!(file_id = %entry.file_id(), offset = entry.offset(), "Demoting burst entry to LRU-K tier");
                    self.demote(tail);
                    metrics.record_demotion();
                }
            } else {
                let Some(victim) = self.lru_k.first(&self.entries) else {
                    break;
                };
                let entry = self.entries.get(victim);
                debug!(file_id = %entry.file_id(), offset = entry.offset(), kth_recent = entry.history.kth_recent(), "Evicting LRU-K entry");
                disposal.retire(self.unlink(victim));
                metrics.record_lru_k_eviction();
            }
        }
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            total_cache_size: self.total_cache_size,
            target_burst_cache_size: self.target_burst_cache_size,
            current_cache_size: self.current_cache_size,
            current_burst_cache_size: self.current_burst_cache_size,
            entries: self.entries.len(),
            burst_entries: self.recency.len(),
            lru_k_entries: self.lru_k.count(),
        }
    }

    fn verify_invariants(&self) -> Result<()> {
        self.ranges.verify_invariants(&self.entries)?;
        self.lru_k.verify_invariants(&self.entries)?;
        self.recency.verify_invariants(&self.entries)?;

        let live = self.entries.len();
        if self.ranges.count() != live {
            return Err(Error::InvariantViolation(format!(
                "range index holds {} of {live} entries",
                self.ranges.count()
            )));
        }
        if self.recency.len() + self.lru_k.count() != live {
            return Err(Error::InvariantViolation(format!(
                "tiers hold {} + {} of {live} entries",
                self.recency.len(),
                self.lru_k.count()
            )));
        }

        let mut total = 0u64;
        let mut burst = 0u64;
        for id in self.entries.ids() {
            let entry = self.entries.get(id);
            total += entry.length();
            let (in_list, in_lru_k) = (entry.recency_links.is_linked(), entry.lru_k_links.is_linked());
            match entry.tier {
                Tier::Burst if in_list && !in_lru_k => burst += entry.length(),
                Tier::LongTerm if in_lru_k && !in_list => {}
                tier => {
                    return Err(Error::InvariantViolation(format!(
                        "entry {id:?} in {tier:?} tier has list={in_list} lru_k={in_lru_k}"
                    )))
                }
            }
            if entry
                .waiters
                .iter()
                .any(|w| w.registered_entry() != Some(id))
            {
                return Err(Error::InvariantViolation(format!(
                    "entry {id:?} holds a waiter registered elsewhere"
                )));
            }
        }

        if total != self.current_cache_size || burst != self.current_burst_cache_size {
            return Err(Error::InvariantViolation(format!(
                "usage counters ({}, {}) disagree with entries ({total}, {burst})",
                self.current_cache_size, self.current_burst_cache_size
            )));
        }
        Ok(())
    }
}

/// LRU-K byte-range read cache.
///
/// All operations take one internal lock for their critical section only;
/// the cache is `Send + Sync` and spawns no threads.
pub struct ReadCache {
    state: Mutex<CacheState>,
    correlated_timeout_ms: u64,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
    cache_id: u64,
    next_waiter_id: AtomicU64,
}

impl std::fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCache")
            .field("stats", &self.stats())
            .field("correlated_timeout_ms", &self.correlated_timeout_ms)
            .finish()
    }
}

impl ReadCache {
    /// Create a cache with the given budgets and correlation window in seconds
    pub fn create(
        total_cache_size: u64,
        target_burst_cache_size: u64,
        correlated_reference_timeout_secs: u64,
    ) -> Result<Self> {
        Self::new(ReadCacheConfig::new(
            total_cache_size,
            target_burst_cache_size,
            correlated_reference_timeout_secs,
        ))
    }

    /// Create a cache from a configuration, using a monotonic clock
    pub fn new(config: ReadCacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a cache reading time from `clock`
    pub fn with_clock(config: ReadCacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        info!(
            total_cache_size = config.total_cache_size,
            target_burst_cache_size = config.target_burst_cache_size,
            correlated_reference_timeout_ms = config.correlated_reference_timeout_ms(),
            "Creating read cache"
        );
        Ok(Self {
            state: Mutex::new(CacheState::new(&config)),
            correlated_timeout_ms: config.correlated_reference_timeout_ms(),
            clock,
            metrics: CacheMetrics::new(),
            cache_id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            next_waiter_id: AtomicU64::new(1),
        })
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    /// Change both budgets, evicting immediately if usage now exceeds them
    pub fn set_cache_size(&self, total_cache_size: u64, target_burst_cache_size: u64) -> Result<()> {
        validate_sizes(total_cache_size, target_burst_cache_size)?;
        info!(total_cache_size, target_burst_cache_size, "Resizing read cache");

        let mut disposal = Disposal::new();
        {
            let mut state = self.state.lock();
            state.total_cache_size = total_cache_size;
            state.target_burst_cache_size = target_burst_cache_size;
            state.adjust_cache_usage(&mut disposal, &self.metrics);
        }
        disposal.finish(&self.metrics);
        Ok(())
    }

    /// (total budget, burst target)
    pub fn query_cache_size(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.total_cache_size, state.target_burst_cache_size)
    }

    /// (bytes cached, bytes in the burst tier)
    pub fn query_cache_usage(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.current_cache_size, state.current_burst_cache_size)
    }

    // =========================================================================
    // Data path
    // =========================================================================

    /// Cache `data` at `[offset, offset + data.len())`, replacing every
    /// overlapping range of the same file. An empty buffer is ignored.
    pub fn add(&self, file_id: FileId, offset: u64, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let length = data.len() as u64;
        let range =
            ByteRange::new(file_id, offset, length).ok_or(Error::InvalidRange { offset, length })?;
        let now_ms = self.clock.now_ms();

        let mut disposal = Disposal::new();
        let result = {
            let mut state = self.state.lock();
            let result = state.add(range, data, now_ms, &mut disposal, &self.metrics);
            if result.is_ok() {
                state.adjust_cache_usage(&mut disposal, &self.metrics);
            }
            result
        };
        disposal.finish(&self.metrics);
        result
    }

    /// Find the cached range covering `offset` and count it as a reference
    pub fn query(&self, file_id: FileId, offset: u64) -> Option<QueryHit> {
        let probe = ByteRange::probe(file_id, offset);
        let now_ms = self.clock.now_ms();

        let mut disposal = Disposal::new();
        let hit = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.ranges.lookup(&state.entries, &probe) {
                None => None,
                Some(id) => {
                    state.touch(id, now_ms, self.correlated_timeout_ms, false, &self.metrics);
                    let entry = state.entries.get(id);
                    let hit = QueryHit {
                        offset: entry.offset(),
                        data: entry.data().clone(),
                    };
                    state.adjust_cache_usage(&mut disposal, &self.metrics);
                    Some(hit)
                }
            }
        };
        disposal.finish(&self.metrics);

        match hit {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        hit
    }

    /// Start offset of the range covering `offset`, or else of the next cached
    /// range of the same file. Does not count as a reference.
    pub fn query_equal_or_next(&self, file_id: FileId, offset: u64) -> Option<u64> {
        let probe = ByteRange::probe(file_id, offset);
        let state = self.state.lock();
        state
            .ranges
            .lookup_equal_or_next(&state.entries, &probe)
            .map(|id| state.entries.get(id))
            .filter(|entry| entry.file_id() == file_id)
            .map(CacheEntry::offset)
    }

    /// Drop every cached range of `file_id` overlapping `[offset, offset + length)`.
    ///
    /// The lock is released every [`REMOVE_RANGE_BATCH`] removals.
    pub fn remove_range(&self, file_id: FileId, offset: u64, length: u64) {
        let length = length.min(u64::MAX - offset);
        if length == 0 {
            return;
        }
        let range = ByteRange {
            file_id,
            offset,
            length,
        };

        let mut removed_total = 0u64;
        loop {
            let mut disposal = Disposal::new();
            let mut removed = 0u64;
            let mut exhausted = false;
            {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                for _ in 0..REMOVE_RANGE_BATCH {
                    match state.ranges.lookup(&state.entries, &range) {
                        Some(id) => {
                            disposal.retire(state.unlink(id));
                            removed += 1;
                        }
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }
            }
            self.metrics.record_invalidated(removed);
            disposal.finish(&self.metrics);
            removed_total += removed;
            if exhausted {
                break;
            }
        }

        if removed_total > 0 {
            debug!(%file_id, offset, length, removed = removed_total, "Invalidated cached ranges");
        }
    }

    /// Remove every entry, completing all attached waiters with `Evicted`.
    ///
    /// Like [`remove_range`](Self::remove_range), the lock is released every
    /// [`REMOVE_RANGE_BATCH`] removals.
    pub fn clear(&self) {
        loop {
            let mut disposal = Disposal::new();
            let exhausted = {
                let mut state = self.state.lock();
                let batch: Vec<EntryId> = state.entries.ids().take(REMOVE_RANGE_BATCH).collect();
                for &id in &batch {
                    let entry = state.unlink(id);
                    disposal.retire(entry);
                }
                batch.len() < REMOVE_RANGE_BATCH
            };
            disposal.finish(&self.metrics);
            if exhausted {
                break;
            }
        }
    }

    // =========================================================================
    // Eviction waiters
    // =========================================================================

    /// Allocate a reusable eviction waiter bound to this cache.
    ///
    /// Never fails today: the waiter is a single `Arc` allocation, which aborts
    /// rather than returning on exhaustion. The `Result` keeps the signature
    /// aligned with the other allocating operations (`add`).
    pub fn allocate_register_for_eviction(&self) -> Result<EvictionWaiter> {
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        Ok(EvictionWaiter::new(id, self.cache_id))
    }

    fn owns(&self, waiter: &EvictionWaiter) -> bool {
        waiter.owner() == self.cache_id
    }

    /// Ask for `on_complete` to run once the range starting at `offset` leaves
    /// the cache.
    ///
    /// If no cached range starts at `offset` the waiter completes immediately
    /// with [`EvictionStatus::Evicted`]. Otherwise the entry's whole touch
    /// history is refreshed, making it as resistant to eviction as possible.
    /// Fails with `ForeignWaiter` if `waiter` was allocated by another cache
    /// and with `WaiterBusy` if it is still registered.
    pub fn register_for_eviction<F>(
        &self,
        waiter: &EvictionWaiter,
        file_id: FileId,
        offset: u64,
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(EvictionStatus) + Send + 'static,
    {
        if !self.owns(waiter) {
            return Err(Error::ForeignWaiter { id: waiter.id() });
        }
        let callback: EvictionCallback = Box::new(on_complete);
        let now_ms = self.clock.now_ms();
        let probe = ByteRange::probe(file_id, offset);

        let mut disposal = Disposal::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            waiter.ensure_idle()?;

            let found = state
                .ranges
                .lookup(&state.entries, &probe)
                .filter(|&id| state.entries.get(id).offset() == offset);

            match found {
                None => {
                    debug!(waiter_id = waiter.id(), %file_id, offset, "Eviction target already absent");
                    waiter.complete_now(EvictionStatus::Evicted);
                    disposal.complete(waiter, callback, EvictionStatus::Evicted);
                }
                Some(id) => {
                    debug!(waiter_id = waiter.id(), %file_id, offset, "Registered for eviction");
                    waiter.attach(id, callback);
                    state.entries.get_mut(id).waiters.push(waiter.clone());
                    state.warm(id, now_ms, &self.metrics);
                    state.adjust_cache_usage(&mut disposal, &self.metrics);
                }
            }
        }
        disposal.finish(&self.metrics);
        Ok(())
    }

    /// [`register_for_eviction`](Self::register_for_eviction) delivering the
    /// status through a oneshot channel
    pub fn register_for_eviction_notified(
        &self,
        waiter: &EvictionWaiter,
        file_id: FileId,
        offset: u64,
    ) -> Result<oneshot::Receiver<EvictionStatus>> {
        let (tx, rx) = oneshot::channel();
        self.register_for_eviction(waiter, file_id, offset, move |status| {
            // The receiver may have been dropped; nobody is waiting then.
            let _ = tx.send(status);
        })?;
        Ok(rx)
    }

    /// Cancel a registration. Returns `false` if the waiter was not registered
    /// (already completed, or never registered) or belongs to another cache.
    pub fn cancel(&self, waiter: &EvictionWaiter) -> bool {
        if !self.owns(waiter) {
            return false;
        }
        let mut disposal = Disposal::new();
        let canceled = {
            let mut state = self.state.lock();
            match waiter.registered_entry() {
                None => false,
                Some(id) => {
                    let callback = waiter
                        .detach(EvictionStatus::Canceled)
                        .unwrap_or_else(|| corrupt("registered waiter without callback"));
                    state
                        .entries
                        .get_mut(id)
                        .waiters
                        .retain(|w| !w.same_as(waiter));
                    disposal.complete(waiter, callback, EvictionStatus::Canceled);
                    true
                }
            }
        };
        disposal.finish(&self.metrics);
        canceled
    }

    /// Count a reference to the entry `waiter` watches, without a full query.
    /// Returns `false` if the waiter is not registered or belongs to another cache.
    pub fn touch(&self, waiter: &EvictionWaiter) -> bool {
        if !self.owns(waiter) {
            return false;
        }
        let now_ms = self.clock.now_ms();
        let mut disposal = Disposal::new();
        let registered = {
            let mut state = self.state.lock();
            match waiter.registered_entry() {
                None => false,
                Some(id) => {
                    state.touch(id, now_ms, self.correlated_timeout_ms, false, &self.metrics);
                    state.adjust_cache_usage(&mut disposal, &self.metrics);
                    true
                }
            }
        };
        disposal.finish(&self.metrics);
        registered
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats()
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn burst_entry_count(&self) -> usize {
        self.state.lock().recency.len()
    }

    pub fn lru_k_entry_count(&self) -> usize {
        self.state.lock().lru_k.count()
    }

    /// Tier of the range covering `offset`, without counting a reference
    pub fn tier_of(&self, file_id: FileId, offset: u64) -> Option<Tier> {
        let state = self.state.lock();
        state
            .ranges
            .lookup(&state.entries, &ByteRange::probe(file_id, offset))
            .map(|id| state.entries.get(id).tier())
    }

    /// Check every structural invariant of all three structures and the
    /// usage counters
    pub fn verify_invariants(&self) -> Result<()> {
        self.state.lock().verify_invariants()
    }
}

// =============================================================================
// Tests
// =============================================================================
