#![allow(clippy::unwrap_used)] // unwrap() is idiomatic in tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vidmem_pool::backend::{BufferBackend, HeapBackend, InstrumentedBackend};
use vidmem_pool::{BufferPool, MemoryBudget, PoolOptions};

/// Buffer size used across the integration tests
#[allow(dead_code)]
pub const SIZE: usize = 64 * 1024;

/// Instrumented heap backend shared between a pool and the test
#[allow(dead_code)]
pub type TestBackend = Arc<InstrumentedBackend<HeapBackend>>;

#[allow(dead_code)]
pub fn test_backend() -> TestBackend {
    test_backend_over(HeapBackend::new())
}

/// Instrumented wrapper around any backend
#[allow(dead_code)]
pub fn test_backend_over<B: BufferBackend>(inner: B) -> Arc<InstrumentedBackend<B>> {
    Arc::new(InstrumentedBackend::new(inner))
}

/// Externally-committed pool with `count` buffers of `SIZE` and a short acquire timeout
#[allow(dead_code)]
pub fn external_pool(count: usize, options: PoolOptions) -> (BufferPool, TestBackend) {
    let backend = test_backend();
    let pool = BufferPool::with_budget(
        options,
        Arc::clone(&backend),
        Arc::new(MemoryBudget::new(0)),
    )
    .unwrap();
    for fd in 0..count {
        pool.commit(i32::try_from(fd).unwrap(), SIZE).unwrap();
    }
    (pool, backend)
}

/// Default external options with a 100 ms acquire timeout
#[allow(dead_code)]
pub fn external_options() -> PoolOptions {
    PoolOptions::external(SIZE).with_acquire_timeout(Duration::from_millis(100))
}

/// Poll `condition` until it holds or `timeout` passes
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[allow(dead_code)]
pub struct TestTimeoutGuard {
    cancelled: Arc<AtomicBool>,
}

impl Drop for TestTimeoutGuard {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Abort the test process if the guard is still alive after `duration`
///
/// Pool deadlocks would otherwise hang CI forever.
#[allow(dead_code)]
pub fn test_timeout_guard(duration: Duration) -> TestTimeoutGuard {
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = Arc::clone(&cancelled);
    std::thread::spawn(move || {
        std::thread::sleep(duration);
        if !cancelled_clone.load(Ordering::SeqCst) {
            eprintln!("Test timeout exceeded ({}s). Aborting.", duration.as_secs());
            std::process::abort();
        }
    });
    TestTimeoutGuard { cancelled }
}
