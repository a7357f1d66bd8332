//! vidmem-stress: drive a video buffer pool and verify it releases every buffer
//!
//! A producer fills the pool (or lets its allocator do so), consumer threads
//! acquire frames like display stages would, and the pool is closed at the end,
//! optionally while buffers are still held. Exits non-zero on any leak.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};
use vidmem_pool::backend::{BackendCounters, BufferBackend, HeapBackend, InstrumentedBackend};
use vidmem_pool::cli::{Args, BackendArg, ModeArg, OutputConfig, WorkloadConfig};
use vidmem_pool::{
    BlockGuard, BufferPool, CloseOutcome, MemoryBudget, PoolError, PoolStatsSnapshot, Reaper,
    ReaperOptions,
};

type Backend = InstrumentedBackend<Arc<dyn BufferBackend>>;

/// What one consumer thread observed
#[derive(Debug, Default, Clone, Copy)]
struct ConsumerReport {
    frames: usize,
    skipped: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;
    init_logging(&args.output);

    let started = Instant::now();
    let backend = Arc::new(make_backend(&args)?);
    let budget = Arc::new(MemoryBudget::new(args.memory.budget_bytes()));
    let reaper = Reaper::start(ReaperOptions::new(Duration::from_millis(100)))?;

    let options = args.pool.to_options().with_reaper(&reaper);
    let pool = BufferPool::with_budget(options, Arc::clone(&backend), Arc::clone(&budget))?;

    if args.pool.mode == ModeArg::External {
        commit_external(&pool, &args)?;
    }

    let consumers = run_consumers(&pool, &args.workload)?;
    let close = close_with_held(&pool, &args.workload)?;
    let stats = pool.stats();
    drop(pool);
    reaper.shutdown();

    let counters = backend.counters();
    print_report(&consumers, &close, &stats, &counters, started.elapsed());

    if counters.live_handles > 0 || budget.allocated() > 0 {
        anyhow::bail!(
            "Leak detected: {} live handles, {} budget bytes still reserved",
            counters.live_handles,
            budget.allocated()
        );
    }
    Ok(())
}

fn init_logging(output: &OutputConfig) {
    let level = if output.quiet {
        Level::ERROR
    } else {
        match output.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn base_backend(kind: BackendArg) -> Result<Arc<dyn BufferBackend>> {
    match kind {
        BackendArg::Heap => Ok(Arc::new(HeapBackend::new())),
        #[cfg(target_os = "linux")]
        BackendArg::Memfd => Ok(Arc::new(vidmem_pool::backend::MemfdBackend::new())),
        #[cfg(not(target_os = "linux"))]
        BackendArg::Memfd => Err(anyhow!("The memfd backend is only available on Linux")),
    }
}

fn make_backend(args: &Args) -> Result<Backend> {
    let mut backend = InstrumentedBackend::new(base_backend(args.memory.backend)?);
    if let Some(limit) = args.memory.system_limit_bytes() {
        backend = backend.with_system_limit(limit);
    }
    backend.fail_next_allocations(args.memory.fail_allocations);
    Ok(backend)
}

/// Allocate buffers on a separate producer backend of the same kind and hand them to the pool
fn commit_external(pool: &BufferPool, args: &Args) -> Result<()> {
    let producer = base_backend(args.memory.backend)?;
    let size = args.pool.buffer_size_bytes();
    for _ in 0..args.pool.max_buffers {
        let handle = producer.allocate(size).context("producer allocation failed")?;
        let committed = pool.commit(handle.fd(), handle.size());
        // The pool holds its own reference after import
        producer.release(handle);
        committed.context("commit failed")?;
    }
    info!("committed {} external buffers of {} bytes", args.pool.max_buffers, size);
    Ok(())
}

fn run_consumers(pool: &BufferPool, workload: &WorkloadConfig) -> Result<Vec<ConsumerReport>> {
    thread::scope(|scope| {
        let workers: Vec<_> = (0..workload.consumers)
            .map(|index| scope.spawn(move || consume(pool, workload, index)))
            .collect();
        workers
            .into_iter()
            .map(|worker| {
                worker
                    .join()
                    .map_err(|_| anyhow!("consumer thread panicked"))?
            })
            .collect()
    })
}

fn consume(pool: &BufferPool, workload: &WorkloadConfig, index: usize) -> Result<ConsumerReport> {
    let mut report = ConsumerReport::default();
    for frame in 0..workload.frames {
        let guard = match pool.acquire() {
            Ok(guard) => guard,
            Err(err) if err.is_retryable() => {
                // A display stage drops the frame and moves on
                report.skipped += 1;
                continue;
            }
            Err(PoolError::Closed) => break,
            Err(err) => return Err(err.into()),
        };

        stamp(&guard, frame);
        let extra: Vec<BlockGuard> = (0..workload.extra_refs).map(|_| guard.clone()).collect();
        thread::sleep(workload.hold());
        drop(extra);
        drop(guard);
        report.frames += 1;

        if index == 0 {
            drive_generation_changes(pool, workload, frame)?;
        }
    }
    Ok(report)
}

/// Write the frame number into the first bytes of the buffer
fn stamp(guard: &BlockGuard, frame: usize) {
    let bytes = frame.to_le_bytes();
    if guard.as_ptr().is_null() || guard.size() < bytes.len() {
        return;
    }
    // SAFETY: the guard keeps the mapping alive and it is at least `bytes.len()` long
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), guard.as_ptr(), bytes.len()) };
}

fn drive_generation_changes(pool: &BufferPool, workload: &WorkloadConfig, frame: usize) -> Result<()> {
    if workload.reset_every > 0 && (frame + 1) % workload.reset_every == 0 {
        info!("resetting pool after frame {}", frame);
        pool.reset()?;
    }
    if workload.resize_kb > 0 && frame == workload.frames / 2 {
        pool.resize(workload.resize_kb * 1024)?;
    }
    Ok(())
}

/// Close the pool while a releaser thread still holds `hold_on_close` buffers
fn close_with_held(pool: &BufferPool, workload: &WorkloadConfig) -> Result<CloseOutcome> {
    let mut held = Vec::with_capacity(workload.hold_on_close);
    for _ in 0..workload.hold_on_close {
        held.push(pool.acquire().context("could not acquire a buffer to hold across close")?);
    }

    let linger = workload.hold() * 10;
    thread::scope(|scope| {
        let releaser = scope.spawn(move || {
            thread::sleep(linger);
            drop(held);
        });
        let outcome = pool.close()?;
        if let CloseOutcome::Deferred { outstanding } = outcome {
            warn!("close deferred with {} buffers held", outstanding);
        }
        releaser
            .join()
            .map_err(|_| anyhow!("releaser thread panicked"))?;
        Ok(outcome)
    })
}

fn print_report(
    consumers: &[ConsumerReport],
    close: &CloseOutcome,
    stats: &PoolStatsSnapshot,
    counters: &BackendCounters,
    elapsed: Duration,
) {
    let frames: usize = consumers.iter().map(|c| c.frames).sum();
    let skipped: usize = consumers.iter().map(|c| c.skipped).sum();

    println!("vidmem-stress finished in {:.2?}", elapsed);
    println!("  frames processed:     {}", frames);
    println!("  frames skipped:       {}", skipped);
    println!("  close outcome:        {:?}", close);
    println!("  acquisitions:         {}", stats.acquisitions);
    println!("  acquire timeouts:     {}", stats.acquire_timeouts);
    println!("  peak used:            {}", stats.peak_used);
    println!("  commits:              {}", stats.commits);
    println!("  allocations:          {}", stats.allocations);
    println!("  allocation failures:  {}", stats.allocation_failures);
    println!("  budget deferrals:     {}", stats.budget_deferrals);
    println!("  teardowns:            {}", stats.teardowns);
    println!(
        "  backend calls:        allocate={} import={} map={} unmap={} release={}",
        counters.allocations, counters.imports, counters.maps, counters.unmaps, counters.releases
    );
    println!(
        "  backend live:         {} handles, {} bytes",
        counters.live_handles, counters.live_bytes
    );
}
