//! Intrusive Index Structures
//!
//! Allocation-free containers over caller-owned nodes:
//!
//! - [`OrderedIndex`] - AVL-balanced ordered index
//! - [`RecencyList`] - doubly-linked MRU/LRU list
//!
//! Both reach a node's embedded links through an adapter trait
//! ([`TreeAdapter`], [`ListAdapter`]). The adapter decides how a handle is
//! resolved, so the same algorithms serve arena indices, direct references or
//! offsets into a persisted region, and one node can be a member of several
//! structures at once through separate link fields.

mod list;
mod node;
mod ordered;
mod proptest;

pub use list::{Iter as RecencyIter, RecencyList};
pub use node::{ListAdapter, ListLinks, TreeAdapter, TreeLinks};
pub use ordered::{Iter as OrderedIter, OrderedIndex};
