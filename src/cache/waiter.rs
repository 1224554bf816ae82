//! Eviction Waiters and Deferred Disposal
//!
//! An [`EvictionWaiter`] is a three-state handle:
//!
//! ```text
//!  Unregistered ──register──▶ Registered(entry) ──evict──▶ Completed(Evicted)
//!        │                          │
//!        └──register (absent)──┐    └──cancel──▶ Completed(Canceled)
//!                              ▼
//!                     Completed(Evicted)
//! ```
//!
//! Every transition happens while the owning cache's lock is held, so cancel
//! and eviction can never both complete the same registration. The waiter's
//! own mutex is only taken under that lock and only provides interior
//! mutability. Callbacks never run under the cache lock: they are queued on a
//! [`Disposal`] together with the entries being destroyed and run after the
//! guard is released.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::arena::EntryId;
use super::entry::CacheEntry;
use super::metrics::CacheMetrics;
use crate::error::{Error, Result};

/// Completion callback supplied at registration
pub type EvictionCallback = Box<dyn FnOnce(EvictionStatus) + Send + 'static>;

/// How a registration completed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionStatus {
    /// The watched range left the cache (or was absent when registering)
    Evicted,
    /// The registration was canceled first
    Canceled,
}

enum WaiterState {
    Unregistered,
    Registered {
        entry: EntryId,
        on_complete: EvictionCallback,
    },
    Completed(EvictionStatus),
}

struct WaiterInner {
    id: u64,
    /// Id of the cache that allocated this waiter
    owner: u64,
    state: Mutex<WaiterState>,
}

/// Reusable handle for exactly-once eviction notification.
///
/// Cloning is cheap; clones refer to the same registration.
#[derive(Clone)]
pub struct EvictionWaiter {
    inner: Arc<WaiterInner>,
}

impl EvictionWaiter {
    pub(crate) fn new(id: u64, owner: u64) -> Self {
        Self {
            inner: Arc::new(WaiterInner {
                id,
                owner,
                state: Mutex::new(WaiterState::Unregistered),
            }),
        }
    }

    /// Identifier for logging
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Final status of the most recent registration, if it has completed
    pub fn status(&self) -> Option<EvictionStatus> {
        match &*self.inner.state.lock() {
            WaiterState::Completed(status) => Some(*status),
            _ => None,
        }
    }

    /// Whether the waiter is currently attached to a cached entry
    pub fn is_registered(&self) -> bool {
        matches!(&*self.inner.state.lock(), WaiterState::Registered { .. })
    }

    pub(crate) fn owner(&self) -> u64 {
        self.inner.owner
    }

    pub(crate) fn same_as(&self, other: &EvictionWaiter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn registered_entry(&self) -> Option<EntryId> {
        match &*self.inner.state.lock() {
            WaiterState::Registered { entry, .. } => Some(*entry),
            _ => None,
        }
    }

    /// Fail with `WaiterBusy` if a registration is still outstanding
    pub(crate) fn ensure_idle(&self) -> Result<()> {
        if self.is_registered() {
            return Err(Error::WaiterBusy { id: self.id() });
        }
        Ok(())
    }

    pub(crate) fn attach(&self, entry: EntryId, on_complete: EvictionCallback) {
        *self.inner.state.lock() = WaiterState::Registered { entry, on_complete };
    }

    /// Mark completed without ever attaching
    pub(crate) fn complete_now(&self, status: EvictionStatus) {
        *self.inner.state.lock() = WaiterState::Completed(status);
    }

    /// Leave the `Registered` state, handing back its callback.
    ///
    /// Returns `None` when the waiter was not registered, which is what makes
    /// completion exactly-once.
    pub(crate) fn detach(&self, status: EvictionStatus) -> Option<EvictionCallback> {
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut *state, WaiterState::Completed(status)) {
            WaiterState::Registered { on_complete, .. } => Some(on_complete),
            previous => {
                *state = previous;
                None
            }
        }
    }
}

impl fmt::Debug for EvictionWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.lock() {
            WaiterState::Unregistered => "Unregistered".to_string(),
            WaiterState::Registered { entry, .. } => format!("Registered({entry:?})"),
            WaiterState::Completed(status) => format!("Completed({status:?})"),
        };
        f.debug_struct("EvictionWaiter")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("state", &state)
            .finish()
    }
}

// =============================================================================
// Disposal
// =============================================================================

/// Work collected under the cache lock and performed after it is released
#[derive(Default)]
pub(crate) struct Disposal {
    entries: Vec<CacheEntry>,
    completions: Vec<(u64, EvictionCallback, EvictionStatus)>,
}

impl Disposal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a removed entry for destruction, detaching its waiters
    pub(crate) fn retire(&mut self, mut entry: CacheEntry) {
        for waiter in entry.waiters.drain(..) {
            if let Some(callback) = waiter.detach(EvictionStatus::Evicted) {
                self.completions
                    .push((waiter.id(), callback, EvictionStatus::Evicted));
            }
        }
        self.entries.push(entry);
    }

    /// Queue a callback completion
    pub(crate) fn complete(
        &mut self,
        waiter: &EvictionWaiter,
        callback: EvictionCallback,
        status: EvictionStatus,
    ) {
        self.completions.push((waiter.id(), callback, status));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.completions.is_empty()
    }

    /// Destroy queued entries, then run queued callbacks. Call with no lock held.
    pub(crate) fn finish(self, metrics: &CacheMetrics) {
        if self.is_empty() {
            return;
        }

        let Disposal {
            entries,
            completions,
        } = self;

        if !entries.is_empty() {
            let bytes: u64 = entries.iter().map(CacheEntry::length).sum();
            debug!(entries = entries.len(), bytes, "Destroying retired cache entries");
            drop(entries);
        }

        for (waiter_id, callback, status) in completions {
            debug!(waiter_id, ?status, "Completing eviction waiter");
            match status {
                EvictionStatus::Evicted => metrics.record_waiter_evicted(),
                EvictionStatus::Canceled => metrics.record_waiter_canceled(),
            }
            callback(status);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{ByteRange, FileId};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: &Arc<AtomicUsize>) -> EvictionCallback {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn dummy_entry_id() -> EntryId {
        let mut arena = crate::cache::arena::EntryArena::new();
        let range = ByteRange::new(FileId::from_bytes([0; 16]), 0, 1).unwrap();
        arena
            .insert(CacheEntry::new(range, Bytes::from_static(b"x")))
            .unwrap()
    }

    #[test]
    fn test_new_waiter_is_unregistered() {
        let waiter = EvictionWaiter::new(1, 1);
        assert!(!waiter.is_registered());
        assert!(waiter.status().is_none());
        assert!(waiter.ensure_idle().is_ok());
        assert!(format!("{:?}", waiter).contains("Unregistered"));
    }

    #[test]
    fn test_detach_is_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let waiter = EvictionWaiter::new(2, 1);
        waiter.attach(dummy_entry_id(), counting_callback(&counter));
        assert!(waiter.is_registered());
        assert!(waiter.ensure_idle().is_err());

        let first = waiter.detach(EvictionStatus::Canceled);
        let second = waiter.detach(EvictionStatus::Evicted);
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(waiter.status(), Some(EvictionStatus::Canceled));
    }

    #[test]
    fn test_clones_share_state() {
        let waiter = EvictionWaiter::new(3, 1);
        let clone = waiter.clone();
        clone.complete_now(EvictionStatus::Evicted);
        assert_eq!(waiter.status(), Some(EvictionStatus::Evicted));
        assert!(waiter.same_as(&clone));
        assert!(!waiter.same_as(&EvictionWaiter::new(3, 1)));
    }

    #[test]
    fn test_disposal_runs_callbacks_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let metrics = CacheMetrics::new();

        let waiter = EvictionWaiter::new(4, 1);
        let range = ByteRange::new(FileId::from_bytes([9; 16]), 0, 3).unwrap();
        let mut entry = CacheEntry::new(range, Bytes::from_static(b"abc"));
        waiter.attach(dummy_entry_id(), counting_callback(&counter));
        entry.waiters.push(waiter.clone());

        let mut disposal = Disposal::new();
        disposal.retire(entry);
        assert!(!disposal.is_empty());
        assert!(!waiter.is_registered());

        disposal.finish(&metrics);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(waiter.status(), Some(EvictionStatus::Evicted));
        assert_eq!(metrics.snapshot().waiters_evicted, 1);
    }
}
