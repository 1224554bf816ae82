//! Ordered Index - AVL Tree over Caller-Owned Nodes
//!
//! The index never allocates and never owns a node. Every operation takes the
//! backing store explicitly and resolves handles through a [`TreeAdapter`],
//! so one node can sit in several indexes at once, each through its own
//! embedded [`TreeLinks`].
//!
//! # Algorithm
//!
//! Standard AVL with parent pointers:
//!
//! - Insert walks down to an empty slot, attaches the node, then walks up
//!   recomputing heights and rotating any ancestor whose balance reaches ±2.
//! - Remove splices a leaf or single child into the removed slot. With two
//!   children the in-order predecessor takes the removed node's place and
//!   rebalancing starts at the predecessor's old parent.
//! - `lookup_equal_or_next` / `lookup_equal_or_previous` fall back to the last
//!   node visited, stepping once with `next`/`previous` when the final
//!   comparison points the wrong way.

use std::cmp::Ordering;

use super::node::{TreeAdapter, TreeLinks};
use crate::error::{Error, Result};

#[cold]
#[track_caller]
fn corrupt(what: &str) -> ! {
    panic!("ordered index corrupted: {what}")
}

/// AVL-balanced ordered index
pub struct OrderedIndex<A: TreeAdapter> {
    adapter: A,
    root: Option<A::Handle>,
    count: usize,
}

impl<A: TreeAdapter + Default> Default for OrderedIndex<A> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

impl<A: TreeAdapter> std::fmt::Debug for OrderedIndex<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedIndex")
            .field("root", &self.root)
            .field("count", &self.count)
            .finish()
    }
}

impl<A: TreeAdapter> OrderedIndex<A> {
    /// Create an empty index using the given adapter
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            root: None,
            count: 0,
        }
    }

    /// Number of nodes in the index
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Alias of [`count`](Self::count)
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// The adapter this index was built with
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    #[inline]
    fn links(&self, store: &A::Store, node: A::Handle) -> TreeLinks<A::Handle> {
        *self.adapter.links(store, node)
    }

    #[inline]
    fn links_mut<'s>(
        &self,
        store: &'s mut A::Store,
        node: A::Handle,
    ) -> &'s mut TreeLinks<A::Handle> {
        self.adapter.links_mut(store, node)
    }

    #[inline]
    fn height_of(&self, store: &A::Store, node: Option<A::Handle>) -> u32 {
        node.map_or(0, |n| self.adapter.links(store, n).height)
    }

    #[inline]
    fn compare_key(&self, store: &A::Store, key: &A::Key, node: A::Handle) -> Ordering {
        let node_key = self.adapter.key(store, node);
        self.adapter.compare(key, &node_key)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert `node`, returning `false` if a node with an equal key exists.
    ///
    /// Panics if `node` is already linked into an index through these links.
    pub fn insert(&mut self, store: &mut A::Store, node: A::Handle) -> bool {
        if self.links(store, node).is_linked() {
            corrupt(&format!("node {node:?} inserted while already linked"));
        }

        let key = self.adapter.key(store, node);
        let mut parent = None;
        let mut side = Ordering::Equal;
        let mut cursor = self.root;

        while let Some(current) = cursor {
            side = self.compare_key(store, &key, current);
            parent = Some(current);
            cursor = match side {
                Ordering::Less => self.links(store, current).left,
                Ordering::Greater => self.links(store, current).right,
                Ordering::Equal => return false,
            };
        }

        *self.links_mut(store, node) = TreeLinks {
            left: None,
            right: None,
            parent,
            height: 1,
        };

        match parent {
            None => self.root = Some(node),
            Some(p) if side == Ordering::Less => self.links_mut(store, p).left = Some(node),
            Some(p) => self.links_mut(store, p).right = Some(node),
        }

        self.count += 1;
        self.rebalance_from(store, parent);
        true
    }

    /// Remove `node`. Returns `false` (and does nothing) if it is not linked.
    pub fn remove(&mut self, store: &mut A::Store, node: A::Handle) -> bool {
        let links = self.links(store, node);
        if !links.is_linked() {
            return false;
        }

        let rebalance_start = match (links.left, links.right) {
            (Some(left), Some(right)) => {
                let pred = self.rightmost(store, left);
                let pred_links = self.links(store, pred);

                let start = if pred_links.parent == Some(node) {
                    Some(pred)
                } else {
                    let pred_parent = pred_links
                        .parent
                        .unwrap_or_else(|| corrupt("predecessor without parent"));
                    self.links_mut(store, pred_parent).right = pred_links.left;
                    if let Some(orphan) = pred_links.left {
                        self.links_mut(store, orphan).parent = Some(pred_parent);
                    }
                    self.links_mut(store, pred).left = Some(left);
                    self.links_mut(store, left).parent = Some(pred);
                    Some(pred_parent)
                };

                {
                    let pl = self.links_mut(store, pred);
                    pl.right = Some(right);
                    pl.parent = links.parent;
                    pl.height = links.height;
                }
                self.links_mut(store, right).parent = Some(pred);
                self.replace_child(store, links.parent, node, Some(pred));
                start
            }
            (child, None) | (None, child) => {
                self.replace_child(store, links.parent, node, child);
                if let Some(c) = child {
                    self.links_mut(store, c).parent = links.parent;
                }
                links.parent
            }
        };

        self.links_mut(store, node).reset();
        self.count = self
            .count
            .checked_sub(1)
            .unwrap_or_else(|| corrupt("count underflow on remove"));
        self.rebalance_from(store, rebalance_start);
        true
    }

    fn replace_child(
        &mut self,
        store: &mut A::Store,
        parent: Option<A::Handle>,
        old: A::Handle,
        new: Option<A::Handle>,
    ) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let pl = self.links_mut(store, p);
                if pl.left == Some(old) {
                    pl.left = new;
                } else if pl.right == Some(old) {
                    pl.right = new;
                } else {
                    corrupt("parent does not point back at child");
                }
            }
        }
    }

    fn update_height(&self, store: &mut A::Store, node: A::Handle) {
        let links = self.links(store, node);
        let height = 1 + self
            .height_of(store, links.left)
            .max(self.height_of(store, links.right));
        self.links_mut(store, node).height = height;
    }

    /// height(right) - height(left)
    fn balance(&self, store: &A::Store, node: A::Handle) -> i64 {
        let links = self.links(store, node);
        i64::from(self.height_of(store, links.right)) - i64::from(self.height_of(store, links.left))
    }

    fn rotate_left(&mut self, store: &mut A::Store, x: A::Handle) -> A::Handle {
        let xl = self.links(store, x);
        let y = xl
            .right
            .unwrap_or_else(|| corrupt("rotate_left without right child"));
        let inner = self.links(store, y).left;

        self.links_mut(store, x).right = inner;
        if let Some(b) = inner {
            self.links_mut(store, b).parent = Some(x);
        }

        self.links_mut(store, y).parent = xl.parent;
        self.replace_child(store, xl.parent, x, Some(y));

        self.links_mut(store, y).left = Some(x);
        self.links_mut(store, x).parent = Some(y);

        self.update_height(store, x);
        self.update_height(store, y);
        y
    }

    fn rotate_right(&mut self, store: &mut A::Store, x: A::Handle) -> A::Handle {
        let xl = self.links(store, x);
        let y = xl
            .left
            .unwrap_or_else(|| corrupt("rotate_right without left child"));
        let inner = self.links(store, y).right;

        self.links_mut(store, x).left = inner;
        if let Some(b) = inner {
            self.links_mut(store, b).parent = Some(x);
        }

        self.links_mut(store, y).parent = xl.parent;
        self.replace_child(store, xl.parent, x, Some(y));

        self.links_mut(store, y).right = Some(x);
        self.links_mut(store, x).parent = Some(y);

        self.update_height(store, x);
        self.update_height(store, y);
        y
    }

    /// Walk from `start` to the root fixing heights and rotating where needed.
    fn rebalance_from(&mut self, store: &mut A::Store, start: Option<A::Handle>) {
        let mut cursor = start;

        while let Some(node) = cursor {
            self.update_height(store, node);
            let balance = self.balance(store, node);

            let subtree_root = if balance > 1 {
                let right = self
                    .links(store, node)
                    .right
                    .unwrap_or_else(|| corrupt("right-heavy node without right child"));
                if self.balance(store, right) < 0 {
                    self.rotate_right(store, right);
                }
                self.rotate_left(store, node)
            } else if balance < -1 {
                let left = self
                    .links(store, node)
                    .left
                    .unwrap_or_else(|| corrupt("left-heavy node without left child"));
                if self.balance(store, left) > 0 {
                    self.rotate_left(store, left);
                }
                self.rotate_right(store, node)
            } else {
                node
            };

            cursor = self.links(store, subtree_root).parent;
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find the node whose key compares equal to `key`
    pub fn lookup(&self, store: &A::Store, key: &A::Key) -> Option<A::Handle> {
        let mut cursor = self.root;
        while let Some(node) = cursor {
            cursor = match self.compare_key(store, key, node) {
                Ordering::Equal => return Some(node),
                Ordering::Less => self.links(store, node).left,
                Ordering::Greater => self.links(store, node).right,
            };
        }
        None
    }

    /// Find the node equal to `key`, or else the smallest node greater than it
    pub fn lookup_equal_or_next(&self, store: &A::Store, key: &A::Key) -> Option<A::Handle> {
        match self.descend(store, key) {
            Descent::Found(node) => Some(node),
            Descent::Empty => None,
            Descent::Stopped(node, Ordering::Less) => Some(node),
            Descent::Stopped(node, _) => self.next(store, node),
        }
    }

    /// Find the node equal to `key`, or else the largest node less than it
    pub fn lookup_equal_or_previous(&self, store: &A::Store, key: &A::Key) -> Option<A::Handle> {
        match self.descend(store, key) {
            Descent::Found(node) => Some(node),
            Descent::Empty => None,
            Descent::Stopped(node, Ordering::Greater) => Some(node),
            Descent::Stopped(node, _) => self.previous(store, node),
        }
    }

    fn descend(&self, store: &A::Store, key: &A::Key) -> Descent<A::Handle> {
        let mut last = None;
        let mut cursor = self.root;
        while let Some(node) = cursor {
            let ord = self.compare_key(store, key, node);
            last = Some((node, ord));
            cursor = match ord {
                Ordering::Equal => return Descent::Found(node),
                Ordering::Less => self.links(store, node).left,
                Ordering::Greater => self.links(store, node).right,
            };
        }
        match last {
            Some((node, ord)) => Descent::Stopped(node, ord),
            None => Descent::Empty,
        }
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Smallest node
    pub fn first(&self, store: &A::Store) -> Option<A::Handle> {
        self.root.map(|r| self.leftmost(store, r))
    }

    /// Largest node
    pub fn last(&self, store: &A::Store) -> Option<A::Handle> {
        self.root.map(|r| self.rightmost(store, r))
    }

    /// In-order successor of `node`
    pub fn next(&self, store: &A::Store, node: A::Handle) -> Option<A::Handle> {
        let links = self.links(store, node);
        if let Some(right) = links.right {
            return Some(self.leftmost(store, right));
        }
        let mut child = node;
        let mut parent = links.parent;
        while let Some(p) = parent {
            let pl = self.links(store, p);
            if pl.left == Some(child) {
                return Some(p);
            }
            child = p;
            parent = pl.parent;
        }
        None
    }

    /// In-order predecessor of `node`
    pub fn previous(&self, store: &A::Store, node: A::Handle) -> Option<A::Handle> {
        let links = self.links(store, node);
        if let Some(left) = links.left {
            return Some(self.rightmost(store, left));
        }
        let mut child = node;
        let mut parent = links.parent;
        while let Some(p) = parent {
            let pl = self.links(store, p);
            if pl.right == Some(child) {
                return Some(p);
            }
            child = p;
            parent = pl.parent;
        }
        None
    }

    fn leftmost(&self, store: &A::Store, mut node: A::Handle) -> A::Handle {
        while let Some(left) = self.links(store, node).left {
            node = left;
        }
        node
    }

    fn rightmost(&self, store: &A::Store, mut node: A::Handle) -> A::Handle {
        while let Some(right) = self.links(store, node).right {
            node = right;
        }
        node
    }

    /// In-order iterator over node handles
    pub fn iter<'a>(&'a self, store: &'a A::Store) -> Iter<'a, A> {
        Iter {
            index: self,
            store,
            cursor: self.first(store),
        }
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check ordering, balance, heights, parent links and the node count.
    pub fn verify_invariants(&self, store: &A::Store) -> Result<()> {
        if let Some(root) = self.root {
            if self.links(store, root).parent.is_some() {
                return Err(violation(format!("root {root:?} has a parent")));
            }
        }

        let (_, counted) = self.verify_subtree(store, self.root, None)?;
        if counted != self.count {
            return Err(violation(format!(
                "count is {} but {} nodes are reachable",
                self.count, counted
            )));
        }

        let mut previous: Option<A::Key> = None;
        for node in self.iter(store) {
            let key = self.adapter.key(store, node);
            if let Some(prev) = previous {
                if self.adapter.compare(&prev, &key) != Ordering::Less {
                    return Err(violation(format!(
                        "in-order keys not strictly increasing: {prev:?} then {key:?}"
                    )));
                }
            }
            previous = Some(key);
        }

        Ok(())
    }

    fn verify_subtree(
        &self,
        store: &A::Store,
        node: Option<A::Handle>,
        parent: Option<A::Handle>,
    ) -> Result<(u32, usize)> {
        let Some(node) = node else {
            return Ok((0, 0));
        };
        let links = self.links(store, node);
        if links.parent != parent {
            return Err(violation(format!(
                "node {node:?} has parent {:?}, expected {parent:?}",
                links.parent
            )));
        }

        let (left_height, left_count) = self.verify_subtree(store, links.left, Some(node))?;
        let (right_height, right_count) = self.verify_subtree(store, links.right, Some(node))?;

        if links.height != 1 + left_height.max(right_height) {
            return Err(violation(format!(
                "node {node:?} height {} with children {left_height}/{right_height}",
                links.height
            )));
        }
        if left_height.abs_diff(right_height) > 1 {
            return Err(violation(format!(
                "node {node:?} unbalanced: {left_height}/{right_height}"
            )));
        }

        Ok((links.height, 1 + left_count + right_count))
    }
}

fn violation(message: String) -> Error {
    Error::InvariantViolation(message)
}

enum Descent<H> {
    Empty,
    Found(H),
    Stopped(H, Ordering),
}

/// In-order iterator returned by [`OrderedIndex::iter`]
pub struct Iter<'a, A: TreeAdapter> {
    index: &'a OrderedIndex<A>,
    store: &'a A::Store,
    cursor: Option<A::Handle>,
}

impl<A: TreeAdapter> Iterator for Iter<'_, A> {
    type Item = A::Handle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.index.next(self.store, current);
        Some(current)
    }
}

// =============================================================================
// Tests
// =============================================================================
