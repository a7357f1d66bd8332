//! Command-line interface for the `vidmem-stress` harness
//!
//! This module organizes CLI arguments by **functional usage** - each group
//! contains the options needed by a specific component of the harness.

use crate::config::{ClosePolicy, PoolMode, PoolOptions};
use anyhow::Result;
use clap::Parser;
use std::time::Duration;

/// Drive a video buffer pool with a decoder-like producer and display-like consumers
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Pool configuration
    #[command(flatten)]
    pub pool: PoolConfig,

    /// Backing memory configuration
    #[command(flatten)]
    pub memory: MemoryConfig,

    /// Workload shape
    #[command(flatten)]
    pub workload: WorkloadConfig,

    /// Output and logging configuration
    #[command(flatten)]
    pub output: OutputConfig,
}

// ============================================================================
// FUNCTIONAL GROUPS: Organized by what component consumes them
// ============================================================================

/// Pool configuration
///
/// Used by: `BufferPool::with_budget()`
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Pool Options")]
pub struct PoolConfig {
    /// Who supplies the buffers
    #[arg(long, default_value = "internal")]
    pub mode: ModeArg,

    /// Buffer size in KB
    #[arg(long, default_value = "1024")]
    pub buffer_size_kb: usize,

    /// Maximum live buffers (internal mode) or buffers committed up front (external mode)
    #[arg(long, default_value = "8")]
    pub max_buffers: usize,

    /// Free-buffer count below which the allocator is woken
    #[arg(long, default_value = "2")]
    pub low_water_mark: usize,

    /// Acquire timeout in milliseconds
    #[arg(long, default_value = "1000")]
    pub acquire_timeout_ms: u64,

    /// Allocator back-off after a failed allocation, in milliseconds
    #[arg(long, default_value = "40")]
    pub reclaim_backoff_ms: u64,

    /// What close does while buffers are still held
    #[arg(long, default_value = "defer")]
    pub close_policy: ClosePolicyArg,
}

impl PoolConfig {
    /// Buffer size in bytes
    #[must_use]
    pub const fn buffer_size_bytes(&self) -> usize {
        self.buffer_size_kb * 1024
    }

    /// Convert to the options struct used by `BufferPool`
    #[must_use]
    pub fn to_options(&self) -> PoolOptions {
        PoolOptions::new(self.mode.into(), self.buffer_size_bytes())
            .with_max_buffers(self.max_buffers)
            .with_low_water_mark(self.low_water_mark)
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .with_reclaim_backoff(Duration::from_millis(self.reclaim_backoff_ms))
            .with_close_policy(self.close_policy.into())
    }
}

/// Backing memory configuration
///
/// Used by: backend construction, `MemoryBudget::new()`
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Memory Options")]
pub struct MemoryConfig {
    /// Buffer backend
    #[arg(long, default_value = "heap")]
    pub backend: BackendArg,

    /// Memory budget in MB for internally-managed allocation
    #[arg(long, default_value = "280")]
    pub budget_mb: usize,

    /// Simulated system memory limit in MB (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub system_limit_mb: usize,

    /// Fail this many backend allocations up front to exercise back-off
    #[arg(long, default_value = "0")]
    pub fail_allocations: usize,
}

impl MemoryConfig {
    #[must_use]
    pub const fn budget_bytes(&self) -> usize {
        self.budget_mb * 1024 * 1024
    }

    /// Simulated limit in bytes, if any
    #[must_use]
    pub const fn system_limit_bytes(&self) -> Option<usize> {
        if self.system_limit_mb == 0 {
            None
        } else {
            Some(self.system_limit_mb * 1024 * 1024)
        }
    }
}

/// Workload shape
///
/// Used by: the producer and consumer threads in `main()`
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Workload Options")]
pub struct WorkloadConfig {
    /// Consumer threads acquiring frames
    #[arg(long, default_value = "4")]
    pub consumers: usize,

    /// Frames each consumer processes
    #[arg(long, default_value = "100")]
    pub frames: usize,

    /// How long a consumer holds each frame, in milliseconds
    #[arg(long, default_value = "2")]
    pub hold_ms: u64,

    /// Extra consumer references taken per frame (exercises retain/release)
    #[arg(long, default_value = "1")]
    pub extra_refs: usize,

    /// Buffers still held when the pool is closed (exercises deferred teardown)
    #[arg(long, default_value = "0")]
    pub hold_on_close: usize,

    /// Reset the pool after every N frames of the first consumer (0 = never)
    #[arg(long, default_value = "0")]
    pub reset_every: usize,

    /// Resize to this many KB halfway through (internal mode, 0 = never)
    #[arg(long, default_value = "0")]
    pub resize_kb: usize,
}

impl WorkloadConfig {
    #[must_use]
    pub const fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

/// Output and logging configuration
///
/// Used by: `main()`, logging initialization
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Output Options")]
pub struct OutputConfig {
    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress all output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    /// Buffers are allocated elsewhere and committed one at a time
    External,
    /// A background allocator fills the pool
    Internal,
}

impl From<ModeArg> for PoolMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::External => Self::ExternallyCommitted,
            ModeArg::Internal => Self::InternallyManaged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ClosePolicyArg {
    /// Wait for outstanding buffers
    Block,
    /// Return immediately and finish teardown later
    Defer,
}

impl From<ClosePolicyArg> for ClosePolicy {
    fn from(policy: ClosePolicyArg) -> Self {
        match policy {
            ClosePolicyArg::Block => Self::Block,
            ClosePolicyArg::Defer => Self::Defer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendArg {
    /// Page-aligned heap memory (portable)
    Heap,
    /// Anonymous shareable memory files (Linux)
    Memfd,
}

// ============================================================================
// IMPLEMENTATION: Validation
// ============================================================================

impl Args {
    /// Validate command-line arguments
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The pool options are rejected by `PoolOptions::validate`
    /// - There are no consumers or no frames
    /// - More buffers are held across close than the pool can hold
    /// - `--resize-kb` or `--reset-every` is used with an external pool
    /// - Both --quiet and --verbose options are used
    pub fn validate(&self) -> Result<()> {
        self.pool.to_options().validate()?;

        if self.workload.consumers == 0 || self.workload.frames == 0 {
            anyhow::bail!("Need at least one consumer and one frame");
        }

        if self.workload.hold_on_close > self.pool.max_buffers {
            anyhow::bail!(
                "Cannot hold {} buffers across close with at most {} buffers",
                self.workload.hold_on_close,
                self.pool.max_buffers
            );
        }

        if self.pool.mode == ModeArg::External {
            if self.workload.resize_kb > 0 {
                anyhow::bail!("--resize-kb requires --mode internal");
            }
            // Nothing recommits after a reset, so every later acquire would time out
            if self.workload.reset_every > 0 {
                anyhow::bail!("--reset-every requires --mode internal");
            }
        }

        if cfg!(not(target_os = "linux")) && self.memory.backend == BackendArg::Memfd {
            anyhow::bail!("The memfd backend is only available on Linux");
        }

        if self.output.quiet && self.output.verbose > 0 {
            anyhow::bail!("Cannot use both --quiet and --verbose options");
        }

        Ok(())
    }
}
