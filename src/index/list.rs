//! Recency List - Intrusive MRU/LRU List
//!
//! Doubly-linked list over caller-owned nodes, addressed the same way as
//! [`OrderedIndex`](super::OrderedIndex). The head is the most recently used
//! end, the tail the least recently used.

use super::node::{ListAdapter, ListLinks};
use crate::error::{Error, Result};

#[cold]
#[track_caller]
fn corrupt(what: &str) -> ! {
    panic!("recency list corrupted: {what}")
}

/// Intrusive doubly-linked recency list
pub struct RecencyList<A: ListAdapter> {
    adapter: A,
    head: Option<A::Handle>,
    tail: Option<A::Handle>,
    len: usize,
}

impl<A: ListAdapter + Default> Default for RecencyList<A> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<A: ListAdapter> std::fmt::Debug for RecencyList<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyList")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("len", &self.len)
            .finish()
    }
}

impl<A: ListAdapter> RecencyList<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Most recently used node
    #[inline]
    pub fn front(&self) -> Option<A::Handle> {
        self.head
    }

    /// Least recently used node
    #[inline]
    pub fn back(&self) -> Option<A::Handle> {
        self.tail
    }

    #[inline]
    fn links(&self, store: &A::Store, node: A::Handle) -> ListLinks<A::Handle> {
        *self.adapter.links(store, node)
    }

    /// Link `node` at the MRU end. Panics if it is already on a list.
    pub fn push_front(&mut self, store: &mut A::Store, node: A::Handle) {
        if self.links(store, node).is_linked() {
            corrupt(&format!("node {node:?} pushed while already linked"));
        }

        *self.adapter.links_mut(store, node) = ListLinks {
            prev: None,
            next: self.head,
            linked: true,
        };
        match self.head {
            Some(old_head) => self.adapter.links_mut(store, old_head).prev = Some(node),
            None => self.tail = Some(node),
        }
        self.head = Some(node);
        self.len += 1;
    }

    /// Unlink `node`. Returns `false` if it was not linked.
    pub fn remove(&mut self, store: &mut A::Store, node: A::Handle) -> bool {
        let links = self.links(store, node);
        if !links.is_linked() {
            return false;
        }

        match links.prev {
            Some(prev) => self.adapter.links_mut(store, prev).next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(next) => self.adapter.links_mut(store, next).prev = links.prev,
            None => self.tail = links.prev,
        }

        self.adapter.links_mut(store, node).reset();
        self.len = self
            .len
            .checked_sub(1)
            .unwrap_or_else(|| corrupt("length underflow on remove"));
        true
    }

    /// Move a linked node to the MRU end
    pub fn move_to_front(&mut self, store: &mut A::Store, node: A::Handle) {
        if self.head == Some(node) {
            return;
        }
        if self.remove(store, node) {
            self.push_front(store, node);
        }
    }

    /// Unlink and return the LRU node
    pub fn pop_back(&mut self, store: &mut A::Store) -> Option<A::Handle> {
        let tail = self.tail?;
        self.remove(store, tail);
        Some(tail)
    }

    /// Iterate from MRU to LRU
    pub fn iter<'a>(&'a self, store: &'a A::Store) -> Iter<'a, A> {
        Iter {
            list: self,
            store,
            cursor: self.head,
        }
    }

    /// Check link symmetry, endpoints and length
    pub fn verify_invariants(&self, store: &A::Store) -> Result<()> {
        let mut previous = None;
        let mut cursor = self.head;
        let mut counted = 0usize;

        while let Some(node) = cursor {
            let links = self.links(store, node);
            if !links.is_linked() || links.prev != previous {
                return Err(Error::InvariantViolation(format!(
                    "recency list node {node:?} has broken back link"
                )));
            }
            counted += 1;
            if counted > self.len {
                return Err(Error::InvariantViolation(
                    "recency list longer than its length".to_string(),
                ));
            }
            previous = Some(node);
            cursor = links.next;
        }

        if previous != self.tail || counted != self.len {
            return Err(Error::InvariantViolation(format!(
                "recency list tail/length mismatch: counted {counted}, len {}",
                self.len
            )));
        }
        Ok(())
    }
}

/// MRU-to-LRU iterator returned by [`RecencyList::iter`]
pub struct Iter<'a, A: ListAdapter> {
    list: &'a RecencyList<A>,
    store: &'a A::Store,
    cursor: Option<A::Handle>,
}

impl<A: ListAdapter> Iterator for Iter<'_, A> {
    type Item = A::Handle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.list.links(self.store, current).next;
        Some(current)
    }
}

// =============================================================================
// Tests
// =============================================================================
