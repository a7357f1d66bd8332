//! Concurrent consumers, retain/release races and close under load
#![allow(clippy::unwrap_used)] // unwrap() is idiomatic in tests
#![allow(clippy::panic)]

mod common;

use common::{external_options, external_pool, test_timeout_guard, SIZE};
use rstest::rstest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use vidmem_pool::{BufferPool, ClosePolicy, MemoryBudget, PoolError, PoolOptions};

#[rstest]
#[case(2, 8)]
#[case(4, 4)]
#[case(1, 16)]
fn test_contended_acquire_never_exceeds_pool(#[case] buffers: usize, #[case] consumers: usize) {
    let _timeout = test_timeout_guard(Duration::from_secs(60));
    let options = external_options().with_acquire_timeout(Duration::from_secs(5));
    let (pool, backend) = external_pool(buffers, options);
    let in_flight = AtomicUsize::new(0);
    let max_seen = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..consumers {
            scope.spawn(|| {
                for _ in 0..50 {
                    let guard = pool.acquire().unwrap();
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                }
            });
        }
    });

    assert!(max_seen.load(Ordering::SeqCst) <= buffers);
    let stats = pool.stats();
    assert_eq!(stats.acquisitions, (consumers * 50) as u64);
    assert!(stats.peak_used <= buffers);
    assert_eq!(pool.counts().free, buffers);
    assert_eq!(backend.counters().releases, 0);
}

#[test]
fn test_teardown_happens_exactly_once_under_racing_releases() {
    let _timeout = test_timeout_guard(Duration::from_secs(60));
    for _ in 0..20 {
        let (pool, backend) = external_pool(4, external_options());
        let guards: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        let barrier = Barrier::new(9);

        thread::scope(|scope| {
            for guard in &guards {
                for _ in 0..2 {
                    let clone = guard.clone();
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        for _ in 0..10 {
                            drop(clone.clone());
                        }
                        drop(clone);
                    });
                }
            }
            barrier.wait();
            pool.close().unwrap();
        });
        drop(guards);

        let counters = backend.counters();
        assert_eq!(counters.imports, 4);
        assert_eq!(counters.releases, 4, "every buffer released exactly once");
        assert_eq!(counters.live_handles, 0);
        assert!(pool.is_finalized());
    }
}

#[test]
fn test_raw_id_retain_release_races_with_close() {
    let _timeout = test_timeout_guard(Duration::from_secs(60));
    let (pool, backend) = external_pool(2, external_options());
    let ids: Vec<_> = (0..2).map(|_| pool.acquire().unwrap().into_id()).collect();
    for &id in &ids {
        for _ in 0..8 {
            pool.retain(id).unwrap();
        }
    }

    thread::scope(|scope| {
        for &id in &ids {
            for _ in 0..9 {
                let pool = &pool;
                scope.spawn(move || pool.release(id).unwrap());
            }
        }
        scope.spawn(|| pool.close().unwrap());
    });

    assert_eq!(backend.counters().releases, 2);
    assert_eq!(backend.counters().live_handles, 0);
    for id in ids {
        assert!(matches!(pool.release(id), Err(PoolError::BlockNotFound(_))));
    }
}

#[test]
fn test_waiters_wake_when_pool_closes() {
    let _timeout = test_timeout_guard(Duration::from_secs(60));
    let options = external_options()
        .with_acquire_timeout(Duration::from_secs(30))
        .with_close_policy(ClosePolicy::Defer);
    let (pool, _backend) = external_pool(1, options);
    let held = pool.acquire().unwrap();

    thread::scope(|scope| {
        let waiter = scope.spawn(|| pool.acquire());
        thread::sleep(Duration::from_millis(50));
        pool.close().unwrap();
        assert!(matches!(waiter.join().unwrap(), Err(PoolError::Closed)));
    });
    drop(held);
}

#[test]
fn test_internal_pool_under_load_leaks_nothing() {
    let _timeout = test_timeout_guard(Duration::from_secs(60));
    let backend = common::test_backend();
    let budget = Arc::new(MemoryBudget::new(6 * SIZE));
    let options = PoolOptions::internal(SIZE)
        .with_max_buffers(6)
        .with_low_water_mark(2)
        .with_acquire_timeout(Duration::from_millis(200));
    let pool = BufferPool::with_budget(options, Arc::clone(&backend), Arc::clone(&budget)).unwrap();
    let skipped = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..6 {
            scope.spawn(|| {
                for _ in 0..40 {
                    match pool.acquire() {
                        Ok(guard) => {
                            let extra = guard.clone();
                            thread::sleep(Duration::from_millis(1));
                            drop(extra);
                        }
                        Err(err) if err.is_retryable() => {
                            skipped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            });
        }
    });

    assert!(budget.allocated() <= budget.ceiling());
    assert!(pool.counts().total() <= 6);
    drop(pool);
    assert_eq!(budget.allocated(), 0);
    assert_eq!(backend.counters().live_handles, 0);
}
