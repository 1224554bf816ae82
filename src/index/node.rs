//! Node Links and Addressing Strategies
//!
//! Index nodes are owned by the caller. The index only ever sees a *handle*
//! to a node and reaches its links through an adapter, so the same algorithms
//! run over direct references, arena indices or relative offsets.

use std::cmp::Ordering;
use std::fmt::Debug;

/// Links embedded in a node that participates in an [`OrderedIndex`].
///
/// A height of 0 means the node is not currently in any index.
///
/// [`OrderedIndex`]: super::OrderedIndex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLinks<H> {
    pub(crate) left: Option<H>,
    pub(crate) right: Option<H>,
    pub(crate) parent: Option<H>,
    pub(crate) height: u32,
}

impl<H> Default for TreeLinks<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> TreeLinks<H> {
    /// Detached links
    pub const fn new() -> Self {
        Self {
            left: None,
            right: None,
            parent: None,
            height: 0,
        }
    }

    /// Whether the owning node is currently inserted in an index
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.height != 0
    }

    /// Subtree height (0 when detached)
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Links embedded in a node that participates in a [`RecencyList`].
///
/// [`RecencyList`]: super::RecencyList
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListLinks<H> {
    pub(crate) prev: Option<H>,
    pub(crate) next: Option<H>,
    pub(crate) linked: bool,
}

impl<H> Default for ListLinks<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ListLinks<H> {
    /// Detached links
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
        }
    }

    /// Whether the owning node is currently on a list
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Addressing strategy and ordering for one [`OrderedIndex`] role.
///
/// A node type may carry several [`TreeLinks`]; each role gets its own
/// adapter selecting the right one. `Handle` is whatever the caller uses to
/// name a node: an arena slot, a relative offset, a raw pointer wrapper.
///
/// [`OrderedIndex`]: super::OrderedIndex
pub trait TreeAdapter {
    /// Backing storage the handles resolve against
    type Store: ?Sized;
    /// Node address
    type Handle: Copy + Eq + Debug;
    /// Ordering key extracted from a node
    type Key: Copy + Debug;

    /// Links for `node` in this role
    fn links<'a>(&self, store: &'a Self::Store, node: Self::Handle) -> &'a TreeLinks<Self::Handle>;

    /// Mutable links for `node` in this role
    fn links_mut<'a>(
        &self,
        store: &'a mut Self::Store,
        node: Self::Handle,
    ) -> &'a mut TreeLinks<Self::Handle>;

    /// Current key of `node`
    fn key(&self, store: &Self::Store, node: Self::Handle) -> Self::Key;

    /// Three-way comparison between two keys
    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;
}

/// Addressing strategy for one [`RecencyList`] role.
///
/// [`RecencyList`]: super::RecencyList
pub trait ListAdapter {
    /// Backing storage the handles resolve against
    type Store: ?Sized;
    /// Node address
    type Handle: Copy + Eq + Debug;

    /// Links for `node` in this role
    fn links<'a>(&self, store: &'a Self::Store, node: Self::Handle) -> &'a ListLinks<Self::Handle>;

    /// Mutable links for `node` in this role
    fn links_mut<'a>(
        &self,
        store: &'a mut Self::Store,
        node: Self::Handle,
    ) -> &'a mut ListLinks<Self::Handle>;
}

// =============================================================================
// Tests
// =============================================================================
