//! Entry Arena
//!
//! Slot storage for [`CacheEntry`] values addressed by [`EntryId`]. The three
//! cache structures link entries by id through the adapters below, each one
//! selecting a different embedded link field.

use std::cmp::Ordering;
use std::fmt;

use super::entry::{ByteRange, CacheEntry};
use crate::error::{Error, Result};
use crate::index::{ListAdapter, ListLinks, TreeAdapter, TreeLinks};

/// Handle to an entry slot
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u32);

impl EntryId {
    #[inline]
    fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cold]
#[track_caller]
fn dangling(id: EntryId) -> ! {
    panic!("entry arena: dangling handle {id:?}")
}

/// Vacant slots are recycled through a free list
#[derive(Default)]
pub struct EntryArena {
    slots: Vec<Option<CacheEntry>>,
    free: Vec<u32>,
    live: usize,
}

impl EntryArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Store `entry`, failing with `OutOfMemory` if the arena cannot grow
    pub fn insert(&mut self, entry: CacheEntry) -> Result<EntryId> {
        if let Some(slot) = self.free.pop() {
            let cell = &mut self.slots[slot as usize];
            debug_assert!(cell.is_none());
            *cell = Some(entry);
            self.live += 1;
            return Ok(EntryId(slot));
        }

        let slot = u32::try_from(self.slots.len())
            .map_err(|_| Error::OutOfMemory { what: "cache entry" })?;
        self.slots
            .try_reserve(1)
            .map_err(|_| Error::OutOfMemory { what: "cache entry" })?;
        // The free list must be able to take this slot back without allocating.
        self.free
            .try_reserve(self.slots.len() + 1)
            .map_err(|_| Error::OutOfMemory { what: "cache entry" })?;
        self.slots.push(Some(entry));
        self.live += 1;
        Ok(EntryId(slot))
    }

    /// Take the entry out of its slot. Panics on a vacant slot.
    pub fn remove(&mut self, id: EntryId) -> CacheEntry {
        let entry = self
            .slots
            .get_mut(id.slot())
            .and_then(Option::take)
            .unwrap_or_else(|| dangling(id));
        self.free.push(id.0);
        self.live -= 1;
        entry
    }

    #[inline]
    pub fn get(&self, id: EntryId) -> &CacheEntry {
        self.slots
            .get(id.slot())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| dangling(id))
    }

    #[inline]
    pub fn get_mut(&mut self, id: EntryId) -> &mut CacheEntry {
        self.slots
            .get_mut(id.slot())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| dangling(id))
    }

    #[cfg(test)]
    pub fn contains(&self, id: EntryId) -> bool {
        matches!(self.slots.get(id.slot()), Some(Some(_)))
    }

    /// Ids of all occupied slots
    pub fn ids(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| EntryId(i as u32))
    }
}

// =============================================================================
// Adapters
// =============================================================================

/// Range index role: keyed by byte range, overlapping ranges compare equal
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeAdapter;

impl TreeAdapter for RangeAdapter {
    type Store = EntryArena;
    type Handle = EntryId;
    type Key = ByteRange;

    fn links<'a>(&self, store: &'a EntryArena, node: EntryId) -> &'a TreeLinks<EntryId> {
        &store.get(node).range_links
    }

    fn links_mut<'a>(&self, store: &'a mut EntryArena, node: EntryId) -> &'a mut TreeLinks<EntryId> {
        &mut store.get_mut(node).range_links
    }

    fn key(&self, store: &EntryArena, node: EntryId) -> ByteRange {
        store.get(node).range()
    }

    fn compare(&self, a: &ByteRange, b: &ByteRange) -> Ordering {
        a.compare_overlap(b)
    }
}

/// LRU-K index role: keyed by the K-th most recent touch, smallest first
#[derive(Debug, Default, Clone, Copy)]
pub struct LruKAdapter;

impl TreeAdapter for LruKAdapter {
    type Store = EntryArena;
    type Handle = EntryId;
    /// (K-th recent sequence, id) - the id only breaks ties
    type Key = (u64, EntryId);

    fn links<'a>(&self, store: &'a EntryArena, node: EntryId) -> &'a TreeLinks<EntryId> {
        &store.get(node).lru_k_links
    }

    fn links_mut<'a>(&self, store: &'a mut EntryArena, node: EntryId) -> &'a mut TreeLinks<EntryId> {
        &mut store.get_mut(node).lru_k_links
    }

    fn key(&self, store: &EntryArena, node: EntryId) -> (u64, EntryId) {
        (store.get(node).history.kth_recent(), node)
    }

    fn compare(&self, a: &(u64, EntryId), b: &(u64, EntryId)) -> Ordering {
        a.cmp(b)
    }
}

/// Burst tier recency list role
#[derive(Debug, Default, Clone, Copy)]
pub struct RecencyAdapter;

impl ListAdapter for RecencyAdapter {
    type Store = EntryArena;
    type Handle = EntryId;

    fn links<'a>(&self, store: &'a EntryArena, node: EntryId) -> &'a ListLinks<EntryId> {
        &store.get(node).recency_links
    }

    fn links_mut<'a>(&self, store: &'a mut EntryArena, node: EntryId) -> &'a mut ListLinks<EntryId> {
        &mut store.get_mut(node).recency_links
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::FileId;
    use bytes::Bytes;

    fn entry(offset: u64, data: &'static [u8]) -> CacheEntry {
        let range = ByteRange::new(FileId::from_bytes([1; 16]), offset, data.len() as u64).unwrap();
        CacheEntry::new(range, Bytes::from_static(data))
    }

    #[test]
    fn test_insert_get_remove() {
        let mut arena = EntryArena::new();
        let a = arena.insert(entry(0, b"aa")).unwrap();
        let b = arena.insert(entry(2, b"bbb")).unwrap();

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a).length(), 2);
        assert_eq!(arena.get(b).offset(), 2);

        let removed = arena.remove(a);
        assert_eq!(removed.data().as_ref(), b"aa");
        assert!(!arena.contains(a));
        assert!(arena.contains(b));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut arena = EntryArena::new();
        let a = arena.insert(entry(0, b"x")).unwrap();
        arena.remove(a);
        let b = arena.insert(entry(1, b"y")).unwrap();
        assert_eq!(a, b);
        assert_eq!(arena.ids().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    #[should_panic(expected = "dangling")]
    fn test_dangling_handle_panics() {
        let mut arena = EntryArena::new();
        let a = arena.insert(entry(0, b"x")).unwrap();
        arena.remove(a);
        arena.get(a);
    }

    #[test]
    fn test_lru_k_key_is_kth_recent() {
        let mut arena = EntryArena::new();
        let a = arena.insert(entry(0, b"x")).unwrap();
        arena.get_mut(a).history.record(3, 0);
        arena.get_mut(a).history.record(8, 0);
        assert_eq!(LruKAdapter.key(&arena, a), (3, a));
    }
}
