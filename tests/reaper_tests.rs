//! Deferred destruction through the reaper
#![allow(clippy::unwrap_used)] // unwrap() is idiomatic in tests

mod common;

use common::{external_options, external_pool, test_timeout_guard, wait_until};
use std::time::Duration;
use vidmem_pool::{CloseOutcome, Reaper, ReaperOptions, ScanReport};

#[test]
fn test_scan_finalizes_drained_pools_only() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    // Long interval so only explicit scans run
    let reaper = Reaper::start(ReaperOptions::new(Duration::from_secs(3600))).unwrap();
    let (pool, backend) = external_pool(2, external_options().with_reaper(&reaper));

    let id = pool.acquire().unwrap().into_id();
    assert_eq!(pool.close().unwrap(), CloseOutcome::Deferred { outstanding: 1 });
    assert_eq!(reaper.pending(), 1);

    assert_eq!(reaper.scan_once(), ScanReport { finalized: 0, pending: 1 });
    assert_eq!(backend.counters().live_handles, 1);

    pool.release(id).unwrap();
    assert_eq!(backend.counters().live_handles, 0);
    assert_eq!(reaper.scan_once(), ScanReport { finalized: 1, pending: 0 });
    assert_eq!(reaper.pending(), 0);
}

#[test]
fn test_background_scan_drops_finished_pools() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let reaper = Reaper::start(ReaperOptions::new(Duration::from_millis(10))).unwrap();
    let (pool, backend) = external_pool(3, external_options().with_reaper(&reaper));

    let held = pool.acquire().unwrap();
    drop(pool);
    assert_eq!(reaper.pending(), 1);

    drop(held);
    assert!(wait_until(Duration::from_secs(5), || reaper.pending() == 0));
    assert_eq!(backend.counters().live_handles, 0);
}

#[test]
fn test_pools_closed_cleanly_are_not_registered() {
    let reaper = Reaper::start(ReaperOptions::default()).unwrap();
    let (pool, _backend) = external_pool(2, external_options().with_reaper(&reaper));
    assert_eq!(pool.close().unwrap(), CloseOutcome::Closed);
    assert_eq!(reaper.pending(), 0);
}

#[test]
fn test_pool_outlives_stopped_reaper() {
    let _timeout = test_timeout_guard(Duration::from_secs(30));
    let reaper = Reaper::start(ReaperOptions::new(Duration::from_millis(10))).unwrap();
    let (pool, backend) = external_pool(2, external_options().with_reaper(&reaper));

    let held = pool.acquire().unwrap();
    pool.close().unwrap();
    drop(reaper);

    // The last release still finishes teardown
    drop(held);
    assert!(pool.is_finalized());
    assert_eq!(backend.counters().live_handles, 0);
}
