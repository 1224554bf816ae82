//! Cache Entry Types
//!
//! A [`CacheEntry`] is one cached byte range of one file. It is a member of
//! the range index for its whole life and of exactly one of the two tiers:
//! the burst recency list or the LRU-K index. Each membership has its own
//! embedded link field.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::arena::EntryId;
use super::waiter::EvictionWaiter;
use crate::index::{ListLinks, TreeLinks};

/// Depth of the per-entry touch history (the K of LRU-K)
pub const LRU_K: usize = 2;

/// Opaque fixed-size file identifier, compared byte for byte
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Random identifier
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl From<Uuid> for FileId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Half-open byte range `[offset, offset + length)` within one file.
///
/// Ranges of the same file compare *equal* when they overlap, so an ordered
/// index keyed by `ByteRange` finds the entry covering a 1-byte probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub file_id: FileId,
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Returns `None` when `offset + length` overflows
    pub fn new(file_id: FileId, offset: u64, length: u64) -> Option<Self> {
        offset.checked_add(length)?;
        Some(Self {
            file_id,
            offset,
            length,
        })
    }

    /// Single-byte probe at `offset`
    pub fn probe(file_id: FileId, offset: u64) -> Self {
        Self {
            file_id,
            offset,
            length: 1,
        }
    }

    /// Exclusive end offset
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    #[inline]
    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.compare_overlap(other) == Ordering::Equal
    }

    /// FileId first; within a file, `Less`/`Greater` only for disjoint ranges.
    pub fn compare_overlap(&self, other: &ByteRange) -> Ordering {
        match self.file_id.as_bytes().cmp(other.file_id.as_bytes()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        if self.end() <= other.offset {
            Ordering::Less
        } else if other.end() <= self.offset {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Which replacement tier an entry currently lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// Recency (plain LRU) list: not yet proven sustained reuse
    Burst,
    /// LRU-K index: demoted after a second reference
    LongTerm,
}

/// Ring of the last [`LRU_K`] touch sequence numbers.
///
/// Sequence numbers start at 1, so a zero slot means "never touched that many
/// times". The slot at `next` is always the oldest, i.e. the K-th most recent
/// touch, and is the entry's LRU-K ranking key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TouchHistory {
    ring: [u64; LRU_K],
    next: usize,
    last_touch_ms: u64,
}

impl TouchHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a touch with global sequence number `sequence` at `now_ms`
    pub fn record(&mut self, sequence: u64, now_ms: u64) {
        debug_assert!(sequence != 0, "sequence numbers start at 1");
        self.ring[self.next] = sequence;
        self.next = (self.next + 1) % LRU_K;
        self.last_touch_ms = now_ms;
    }

    /// Whether a touch at `now_ms` falls inside the correlation window
    pub fn is_correlated(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_touch_ms) < timeout_ms
    }

    /// Sequence number of the K-th most recent touch (0 if fewer than K)
    #[inline]
    pub fn kth_recent(&self) -> u64 {
        self.ring[self.next]
    }

    /// Never referenced K times
    #[inline]
    pub fn is_cold(&self) -> bool {
        self.kth_recent() == 0
    }

    #[inline]
    pub fn last_touch_ms(&self) -> u64 {
        self.last_touch_ms
    }

    /// Recorded sequence numbers, most recent first, zeros skipped
    pub fn sequences(&self) -> Vec<u64> {
        (1..=LRU_K)
            .map(|back| self.ring[(self.next + LRU_K - back) % LRU_K])
            .filter(|&s| s != 0)
            .collect()
    }
}

/// One cached byte range
pub struct CacheEntry {
    range: ByteRange,
    data: Bytes,
    pub(crate) history: TouchHistory,
    pub(crate) tier: Tier,
    pub(crate) waiters: Vec<EvictionWaiter>,
    pub(crate) range_links: TreeLinks<EntryId>,
    pub(crate) lru_k_links: TreeLinks<EntryId>,
    pub(crate) recency_links: ListLinks<EntryId>,
}

impl CacheEntry {
    /// Entry covering `[offset, offset + data.len())`; starts detached in the burst tier
    pub(crate) fn new(range: ByteRange, data: Bytes) -> Self {
        debug_assert_eq!(range.length, data.len() as u64);
        Self {
            range,
            data,
            history: TouchHistory::new(),
            tier: Tier::Burst,
            waiters: Vec::new(),
            range_links: TreeLinks::new(),
            lru_k_links: TreeLinks::new(),
            recency_links: ListLinks::new(),
        }
    }

    #[inline]
    pub fn range(&self) -> ByteRange {
        self.range
    }

    #[inline]
    pub fn file_id(&self) -> FileId {
        self.range.file_id
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.range.offset
    }

    #[inline]
    pub fn length(&self) -> u64 {
        self.range.length
    }

    /// Cached bytes (zero-copy clone)
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[inline]
    pub fn history(&self) -> &TouchHistory {
        &self.history
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("file_id", &self.range.file_id)
            .field("offset", &self.range.offset)
            .field("length", &self.range.length)
            .field("tier", &self.tier)
            .field("kth_recent", &self.history.kth_recent())
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
