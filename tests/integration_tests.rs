//! Rangecache Integration Tests
//!
//! Exercises the public read cache API:
//! - Capacity enforcement across both tiers
//! - Range invalidation
//! - Eviction waiters (callback and async forms)
//! - Concurrent access

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;

use rangecache::cache::{
    EvictionStatus, FileId, ManualClock, ReadCache, ReadCacheConfig, Tier, REMOVE_RANGE_BATCH,
};
use rangecache::Error;

fn file(n: u8) -> FileId {
    FileId::from_bytes([n; 16])
}

fn bytes(len: usize) -> Bytes {
    Bytes::from(vec![0x5A; len])
}

// =============================================================================
// Capacity
// =============================================================================

mod capacity_tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_cold_entry_evicted_by_burst_target() {
        let cache = ReadCache::create(300, 100, 0).unwrap();

        cache.add(file(1), 0, bytes(100)).unwrap();
        assert_eq!(cache.query_cache_usage(), (100, 100));

        cache.add(file(1), 100, bytes(100)).unwrap();
        assert_eq!(cache.query_cache_usage(), (100, 100));

        assert_matches!(cache.query(file(1), 0), None);
        assert_matches!(cache.query(file(1), 100), Some(hit) if hit.offset == 100);
    }

    #[test]
    fn test_usage_bounded_after_every_add() {
        let cache = ReadCache::create(64 * 1024, 16 * 1024, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..5_000 {
            let f = file(rng.gen_range(0..4));
            let offset = rng.gen_range(0..256u64) * 512;
            let length = rng.gen_range(1..=2048);

            if rng.gen_bool(0.5) {
                cache.query(f, offset);
            }
            cache.add(f, offset, bytes(length)).unwrap();

            let stats = cache.stats();
            assert!(stats.current_cache_size <= stats.total_cache_size);
            assert!(
                stats.current_burst_cache_size <= stats.target_burst_cache_size
                    || stats.lru_k_entries == 0
            );
        }
        cache.verify_invariants().unwrap();
    }

    #[test]
    fn test_shrinking_evicts_immediately() {
        let cache = ReadCache::create(1000, 1000, 0).unwrap();
        for i in 0..10 {
            cache.add(file(1), i * 100, bytes(100)).unwrap();
            cache.query(file(1), i * 100).unwrap();
        }
        assert_eq!(cache.query_cache_usage(), (1000, 1000));

        cache.set_cache_size(500, 200).unwrap();
        let (total, burst) = cache.query_cache_usage();
        assert!(total <= 500);
        assert!(burst <= 200);
        assert_eq!(cache.query_cache_size(), (500, 200));
        cache.verify_invariants().unwrap();
    }

    #[test]
    fn test_resize_rejects_inverted_budgets() {
        let cache = ReadCache::create(1000, 100, 0).unwrap();
        assert_matches!(cache.set_cache_size(100, 1000), Err(Error::Config(_)));
        assert_eq!(cache.query_cache_size(), (1000, 100));
    }

    #[test]
    fn test_reused_entry_survives_scan() {
        let cache = ReadCache::create(1000, 300, 0).unwrap();
        cache.add(file(1), 0, bytes(100)).unwrap();
        cache.query(file(1), 0).unwrap();

        // A one-pass scan larger than the cache
        for i in 1..=30 {
            cache.add(file(2), i * 100, bytes(100)).unwrap();
        }

        assert_eq!(cache.tier_of(file(1), 0), Some(Tier::LongTerm));
        assert!(cache.query(file(1), 0).is_some());
    }

    #[test]
    fn test_correlated_touches_do_not_count() {
        let clock = Arc::new(ManualClock::new(0));
        let config = ReadCacheConfig::new(1000, 100, 30);
        let cache = ReadCache::with_clock(config, clock.clone()).unwrap();

        cache.add(file(1), 0, bytes(100)).unwrap();
        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            cache.query(file(1), 0).unwrap();
        }
        assert_eq!(cache.metrics().snapshot().suppressed_touches, 5);

        cache.add(file(1), 100, bytes(100)).unwrap();
        assert!(cache.query_equal_or_next(file(1), 0) == Some(100));
    }
}

// =============================================================================
// Invalidation
// =============================================================================

mod invalidation_tests {
    use super::*;

    #[test]
    fn test_remove_range_is_file_scoped() {
        let cache = ReadCache::create(1 << 20, 1 << 20, 0).unwrap();
        for i in 0..10 {
            cache.add(file(1), i * 10, bytes(10)).unwrap();
            cache.add(file(2), i * 10, bytes(10)).unwrap();
        }

        cache.remove_range(file(1), 25, 30);
        // [20,30) [30,40) [40,50) [50,60) removed
        assert_eq!(cache.entry_count(), 16);
        assert_eq!(cache.query_equal_or_next(file(1), 20), Some(60));
        assert_eq!(cache.query_equal_or_next(file(2), 20), Some(20));
    }

    #[test]
    fn test_remove_range_larger_than_batch() {
        let cache = ReadCache::create(1 << 24, 1 << 24, 0).unwrap();
        let count = REMOVE_RANGE_BATCH as u64 * 5;
        for i in 0..count {
            cache.add(file(3), i * 8, bytes(8)).unwrap();
        }

        cache.remove_range(file(3), 0, count * 8);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.query_cache_usage(), (0, 0));
    }

    #[test]
    fn test_add_rejects_overflowing_range() {
        let cache = ReadCache::create(1000, 1000, 0).unwrap();
        assert_matches!(
            cache.add(file(1), u64::MAX, bytes(1)),
            Err(Error::InvalidRange { offset: u64::MAX, length: 1 })
        );
    }
}

// =============================================================================
// Eviction Waiters
// =============================================================================

mod waiter_tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_entry_completes_immediately() {
        let cache = ReadCache::create(1000, 1000, 0).unwrap();
        let waiter = cache.allocate_register_for_eviction().unwrap();

        let rx = cache
            .register_for_eviction_notified(&waiter, file(9), 0)
            .unwrap();
        assert_matches!(rx.await, Ok(EvictionStatus::Evicted));
    }

    #[tokio::test]
    async fn test_eviction_notifies_once() {
        let cache = ReadCache::create(300, 100, 0).unwrap();
        cache.add(file(1), 0, bytes(100)).unwrap();

        let waiter = cache.allocate_register_for_eviction().unwrap();
        let rx = cache
            .register_for_eviction_notified(&waiter, file(1), 0)
            .unwrap();

        cache.remove_range(file(1), 0, 1);
        assert_matches!(rx.await, Ok(EvictionStatus::Evicted));
        assert!(!cache.cancel(&waiter));
        assert_eq!(cache.metrics().snapshot().waiters_evicted, 1);
    }

    #[tokio::test]
    async fn test_superseding_add_notifies() {
        let cache = ReadCache::create(100, 100, 0).unwrap();
        cache.add(file(1), 0, bytes(100)).unwrap();

        let waiter = cache.allocate_register_for_eviction().unwrap();
        let rx = cache
            .register_for_eviction_notified(&waiter, file(1), 0)
            .unwrap();

        // Superseding add
        cache.add(file(1), 50, bytes(10)).unwrap();
        assert_matches!(
            tokio::time::timeout(Duration::from_secs(1), rx).await,
            Ok(Ok(EvictionStatus::Evicted))
        );
    }

    #[tokio::test]
    async fn test_cancel_before_eviction() {
        let cache = ReadCache::create(1000, 1000, 0).unwrap();
        cache.add(file(1), 0, bytes(10)).unwrap();

        let waiter = cache.allocate_register_for_eviction().unwrap();
        let rx = cache
            .register_for_eviction_notified(&waiter, file(1), 0)
            .unwrap();

        assert!(cache.cancel(&waiter));
        assert!(!cache.cancel(&waiter));
        cache.remove_range(file(1), 0, 10);

        assert_matches!(rx.await, Ok(EvictionStatus::Canceled));
        assert_eq!(waiter.status(), Some(EvictionStatus::Canceled));
        assert_eq!(cache.metrics().snapshot().waiters_evicted, 0);
    }

    #[test]
    fn test_busy_waiter_rejected() {
        let cache = ReadCache::create(1000, 1000, 0).unwrap();
        cache.add(file(1), 0, bytes(10)).unwrap();
        let waiter = cache.allocate_register_for_eviction().unwrap();

        cache.register_for_eviction(&waiter, file(1), 0, |_| {}).unwrap();
        assert_matches!(
            cache.register_for_eviction(&waiter, file(1), 0, |_| {}),
            Err(Error::WaiterBusy { id }) if id == waiter.id()
        );
    }

    fn recording_callback(
        log: &Arc<parking_lot::Mutex<Vec<EvictionStatus>>>,
    ) -> impl FnOnce(EvictionStatus) + Send + 'static {
        let log = Arc::clone(log);
        move |status| log.lock().push(status)
    }

    #[test]
    fn test_lru_k_eviction_completes_watched_entry() {
        let cache = ReadCache::create(200, 100, 0).unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        cache.add(file(1), 0, bytes(100)).unwrap();
        let waiter = cache.allocate_register_for_eviction().unwrap();
        cache
            .register_for_eviction(&waiter, file(1), 0, recording_callback(&log))
            .unwrap();

        // Watched entry is demoted, then outranked by a later reuse
        cache.add(file(1), 100, bytes(100)).unwrap();
        assert_eq!(cache.tier_of(file(1), 0), Some(Tier::LongTerm));
        cache.add(file(1), 200, bytes(100)).unwrap();
        cache.query(file(1), 200).unwrap();
        assert!(log.lock().is_empty());

        cache.add(file(1), 300, bytes(100)).unwrap();
        assert!(cache.tier_of(file(1), 0).is_none());
        assert_eq!(*log.lock(), vec![EvictionStatus::Evicted]);

        let snapshot = cache.metrics().snapshot();
        assert_eq!(snapshot.lru_k_evictions, 1);
        assert_eq!(snapshot.waiters_evicted, 1);
        assert_eq!(snapshot.waiters_canceled, 0);
        assert!(!cache.cancel(&waiter));
        cache.verify_invariants().unwrap();
    }

    #[test]
    fn test_shrinking_completes_watched_entry() {
        let cache = ReadCache::create(1000, 1000, 0).unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        cache.add(file(1), 0, bytes(100)).unwrap();
        cache.add(file(1), 100, bytes(100)).unwrap();
        let waiter = cache.allocate_register_for_eviction().unwrap();
        cache
            .register_for_eviction(&waiter, file(1), 0, recording_callback(&log))
            .unwrap();

        cache.set_cache_size(100, 0).unwrap();
        assert!(log.lock().is_empty());
        assert!(waiter.is_registered());

        cache.set_cache_size(0, 0).unwrap();
        assert_eq!(*log.lock(), vec![EvictionStatus::Evicted]);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.metrics().snapshot().waiters_canceled, 0);
    }

    #[test]
    fn test_waiter_bound_to_allocating_cache() {
        let owner = ReadCache::create(1000, 1000, 0).unwrap();
        let other = ReadCache::create(1000, 1000, 0).unwrap();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        owner.add(file(1), 0, bytes(10)).unwrap();
        owner.add(file(1), 100, bytes(10)).unwrap();
        let waiter = owner.allocate_register_for_eviction().unwrap();
        owner
            .register_for_eviction(&waiter, file(1), 0, recording_callback(&log))
            .unwrap();

        // Another cache can neither cancel, touch nor re-register it
        assert!(!other.cancel(&waiter));
        assert!(!other.touch(&waiter));
        assert_matches!(
            other.register_for_eviction(&waiter, file(1), 0, |_| {}),
            Err(Error::ForeignWaiter { id }) if id == waiter.id()
        );
        assert!(waiter.is_registered());
        owner.verify_invariants().unwrap();

        // The owning cache still completes it exactly once
        assert!(owner.cancel(&waiter));
        owner
            .register_for_eviction(&waiter, file(1), 100, recording_callback(&log))
            .unwrap();
        owner.remove_range(file(1), 0, 10);
        assert!(waiter.is_registered());
        assert_eq!(*log.lock(), vec![EvictionStatus::Canceled]);

        owner.remove_range(file(1), 100, 10);
        assert_eq!(
            *log.lock(),
            vec![EvictionStatus::Canceled, EvictionStatus::Evicted]
        );
    }

    #[test]
    fn test_foreign_touch_on_empty_cache() {
        let owner = ReadCache::create(1000, 1000, 0).unwrap();
        let empty = ReadCache::create(1000, 1000, 0).unwrap();
        owner.add(file(1), 0, bytes(10)).unwrap();
        let waiter = owner.allocate_register_for_eviction().unwrap();
        owner.register_for_eviction(&waiter, file(1), 0, |_| {}).unwrap();

        assert!(!empty.touch(&waiter));
        assert!(!empty.cancel(&waiter));
        assert_eq!(empty.entry_count(), 0);
        assert!(owner.touch(&waiter));
    }

    #[test]
    fn test_callback_may_reenter_cache() {
        let cache = Arc::new(ReadCache::create(1000, 1000, 0).unwrap());
        cache.add(file(1), 0, bytes(10)).unwrap();
        let waiter = cache.allocate_register_for_eviction().unwrap();

        let inner = Arc::clone(&cache);
        cache
            .register_for_eviction(&waiter, file(1), 0, move |_| {
                // Runs with the cache lock released
                inner.add(file(1), 0, bytes(20)).unwrap();
            })
            .unwrap();

        cache.remove_range(file(1), 0, 10);
        assert_matches!(cache.query(file(1), 0), Some(hit) if hit.data.len() == 20);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[test]
    fn test_cancel_races_eviction_exactly_once() {
        for round in 0..200u64 {
            let cache = Arc::new(ReadCache::create(1 << 20, 1 << 20, 0).unwrap());
            cache.add(file(1), round, bytes(16)).unwrap();

            let completions = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&completions);
            let waiter = cache.allocate_register_for_eviction().unwrap();
            cache
                .register_for_eviction(&waiter, file(1), round, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();

            let canceler = {
                let cache = Arc::clone(&cache);
                let waiter = waiter.clone();
                std::thread::spawn(move || cache.cancel(&waiter))
            };
            let remover = {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.remove_range(file(1), round, 16))
            };
            canceler.join().unwrap();
            remover.join().unwrap();

            assert_eq!(completions.load(Ordering::SeqCst), 1);
            assert!(waiter.status().is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workload_keeps_invariants() {
        let cache = Arc::new(ReadCache::create(256 * 1024, 64 * 1024, 0).unwrap());

        let tasks: Vec<_> = (0..8u8)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    for i in 0..2_000u64 {
                        let f = file(worker % 3);
                        let offset = (i * 7919 + worker as u64 * 31) % 512 * 1024;
                        if cache.query(f, offset).is_none() {
                            cache.add(f, offset, bytes(1024)).unwrap();
                        }
                        if i % 97 == 0 {
                            cache.remove_range(f, offset, 16 * 1024);
                        }
                        if i % 128 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        cache.verify_invariants().unwrap();
        let stats = cache.stats();
        assert!(stats.current_cache_size <= stats.total_cache_size);
        assert!(stats.current_burst_cache_size <= stats.target_burst_cache_size);
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_config_json_uses_seconds() {
        let config = ReadCacheConfig::new(1024, 256, 7);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["correlated_reference_timeout_secs"], 7);

        let parsed: ReadCacheConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_create_from_default_config() {
        let cache = ReadCache::new(ReadCacheConfig::default()).unwrap();
        let (total, burst) = cache.query_cache_size();
        assert!(burst <= total);
        assert_eq!(cache.query_cache_usage(), (0, 0));
    }
}
