//! Internally-managed pools: prefill, budget back-pressure, allocation back-off, resize
#![allow(clippy::unwrap_used)] // unwrap() is idiomatic in tests

mod common;

use common::{test_backend, test_timeout_guard, wait_until, TestBackend, SIZE};
use rstest::rstest;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vidmem_pool::backend::{HeapBackend, InstrumentedBackend};
use vidmem_pool::{BufferPool, CloseOutcome, MemoryBudget, PoolError, PoolOptions};

const SETTLE: Duration = Duration::from_secs(5);

fn internal_options() -> PoolOptions {
    PoolOptions::internal(SIZE)
        .with_acquire_timeout(Duration::from_millis(100))
        .with_reclaim_backoff(Duration::from_millis(5))
}

fn internal_pool(options: PoolOptions, budget_buffers: usize) -> (BufferPool, TestBackend, Arc<MemoryBudget>) {
    let backend = test_backend();
    let budget = Arc::new(MemoryBudget::new(budget_buffers * SIZE));
    let pool = BufferPool::with_budget(options, Arc::clone(&backend), Arc::clone(&budget)).unwrap();
    (pool, backend, budget)
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
fn test_prefills_to_low_water_mark(#[case] low_water: usize) {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let (pool, backend, budget) = internal_pool(internal_options().with_low_water_mark(low_water), 8);

    assert!(wait_until(SETTLE, || pool.counts().free == low_water));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.counts().free, low_water, "allocator overshot the low-water mark");
    assert_eq!(budget.allocated(), low_water * SIZE);
    assert_eq!(pool.stats().allocations, low_water as u64);
    assert_eq!(backend.counters().allocations, low_water);
}

#[test]
fn test_budget_for_two_buffers_caps_growth() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let (pool, backend, budget) = internal_pool(internal_options(), 2);

    assert!(wait_until(SETTLE, || pool.counts().free == 2));
    assert_eq!(budget.allocated(), 2 * SIZE);

    // Consuming both drops below the low-water mark, but the budget is spent
    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    assert!(wait_until(SETTLE, || pool.stats().budget_deferrals > 0));
    assert!(matches!(pool.acquire(), Err(PoolError::AcquireTimeout { .. })));

    assert!(budget.allocated() <= budget.ceiling());
    assert_eq!(pool.counts().total(), 2);
    assert_eq!(backend.counters().live_handles, 2);

    drop(a);
    drop(b);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.counts().free, 2);
    assert_eq!(budget.allocated(), 2 * SIZE);

    assert_eq!(pool.close().unwrap(), CloseOutcome::Closed);
    assert_eq!(budget.allocated(), 0);
    assert_eq!(backend.counters().live_handles, 0);
}

#[test]
fn test_budget_shared_between_pools() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let budget = Arc::new(MemoryBudget::new(3 * SIZE));
    let backend = test_backend();
    let first = BufferPool::with_budget(internal_options(), Arc::clone(&backend), Arc::clone(&budget)).unwrap();
    let second = BufferPool::with_budget(internal_options(), Arc::clone(&backend), Arc::clone(&budget)).unwrap();

    assert!(wait_until(SETTLE, || {
        first.counts().free + second.counts().free == 3
    }));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(budget.allocated(), 3 * SIZE);
    assert_eq!(first.counts().free + second.counts().free, 3);

    // Closing one pool frees budget the other can use once it asks again
    first.close().unwrap();
    assert_eq!(budget.allocated(), second.counts().free * SIZE);
    let _guard = second.acquire().unwrap();
    assert!(wait_until(SETTLE, || second.counts().free == 2));
}

#[test]
fn test_waiting_acquire_picks_up_budget_freed_elsewhere() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let budget = Arc::new(MemoryBudget::new(2 * SIZE));
    let backend = test_backend();
    let first = BufferPool::with_budget(internal_options(), Arc::clone(&backend), Arc::clone(&budget)).unwrap();
    assert!(wait_until(SETTLE, || first.counts().free == 2));

    // The second pool starts with the whole budget spoken for
    let second = BufferPool::with_budget(internal_options(), Arc::clone(&backend), Arc::clone(&budget)).unwrap();
    assert!(wait_until(SETTLE, || second.stats().budget_deferrals > 0));
    assert_eq!(second.counts().total(), 0);

    thread::scope(|scope| {
        let waiter = scope.spawn(|| second.acquire_timeout(SETTLE));
        thread::sleep(Duration::from_millis(50));
        // Budget comes back without anyone touching the second pool
        first.close().unwrap();
        let guard = waiter.join().unwrap().unwrap();
        assert_eq!(guard.size(), SIZE);
    });
    assert!(budget.allocated() <= budget.ceiling());
}

#[test]
fn test_backs_off_and_recovers_from_allocation_failures() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let backend = test_backend();
    backend.fail_next_allocations(3);
    let budget = Arc::new(MemoryBudget::new(8 * SIZE));
    let pool = BufferPool::with_budget(internal_options(), Arc::clone(&backend), Arc::clone(&budget)).unwrap();

    assert!(wait_until(SETTLE, || pool.counts().free == 2));
    let stats = pool.stats();
    assert_eq!(stats.allocation_failures, 3);
    assert_eq!(stats.allocations, 2);
    // Failed attempts hand their reservation back
    assert_eq!(budget.allocated(), 2 * SIZE);
}

#[test]
fn test_release_wakes_backing_off_allocator() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    // The system has room for exactly two buffers
    let backend = Arc::new(InstrumentedBackend::new(HeapBackend::new()).with_system_limit(2 * SIZE));
    let budget = Arc::new(MemoryBudget::new(8 * SIZE));
    let options = internal_options()
        .with_low_water_mark(2)
        .with_reclaim_backoff(Duration::from_millis(40));
    let pool = BufferPool::with_budget(options, Arc::clone(&backend), Arc::clone(&budget)).unwrap();
    assert!(wait_until(SETTLE, || pool.counts().free == 2));

    let held = pool.acquire().unwrap();
    assert!(wait_until(SETTLE, || pool.stats().allocation_failures > 0));
    assert_eq!(pool.counts().total(), 2);

    drop(held);
    assert!(wait_until(SETTLE, || pool.counts().free == 2));

    // Close joins the allocator promptly even while it is backing off
    let _held = pool.acquire().unwrap();
    let started = Instant::now();
    pool.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_resize_replaces_generation() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let (pool, backend, budget) = internal_pool(internal_options(), 16);
    assert!(wait_until(SETTLE, || pool.counts().free == 2));

    let old = pool.acquire().unwrap();
    let old_descriptor = old.descriptor();
    pool.resize(2 * SIZE).unwrap();

    // Stale free blocks are drained and replaced with the new size
    let fresh = pool.acquire_timeout(SETTLE).unwrap();
    assert_eq!(fresh.size(), 2 * SIZE);
    assert!(wait_until(SETTLE, || pool.counts().free == 2));

    // The stale used block is torn down on release instead of recycled
    drop(old);
    assert_eq!(pool.lookup_descriptor(old_descriptor), None);
    assert_eq!(pool.counts().used, 1);
    assert_eq!(pool.counts().free, 2);

    drop(fresh);
    pool.close().unwrap();
    assert_eq!(budget.allocated(), 0);
    assert_eq!(backend.counters().live_handles, 0);
}

#[test]
fn test_reset_refills_with_fresh_buffers() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let (pool, backend, _budget) = internal_pool(internal_options(), 8);
    assert!(wait_until(SETTLE, || pool.counts().free == 2));

    let held = pool.acquire().unwrap();
    pool.reset().unwrap();
    assert_eq!(pool.counts().aborting, 1);
    assert!(wait_until(SETTLE, || pool.counts().free == 2));

    drop(held);
    assert_eq!(pool.counts().aborting, 0);
    pool.close().unwrap();
    assert_eq!(backend.counters().live_handles, 0);
}

#[test]
fn test_max_buffers_caps_live_blocks() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let options = internal_options().with_max_buffers(3).with_low_water_mark(2);
    let (pool, _backend, _budget) = internal_pool(options, 16);
    assert!(wait_until(SETTLE, || pool.counts().free == 2));

    let guards: Vec<_> = (0..3).map(|_| pool.acquire_timeout(SETTLE).unwrap()).collect();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.counts().total(), 3);
    assert!(matches!(pool.acquire(), Err(PoolError::AcquireTimeout { .. })));
    drop(guards);
}
