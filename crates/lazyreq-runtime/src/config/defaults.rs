//! Library defaults for [`PoolConfig`](super::PoolConfig)
//!
//! Every value here can be overridden at runtime through the matching
//! `LAZYREQ_*` environment variable.

use lazyreq_core::constants::{DEFAULT_MAX_FIBERS, DEFAULT_STACK_SIZE, MAX_WORKERS};

/// Fallback worker count when available parallelism cannot be queried
pub const FALLBACK_NUM_WORKERS: usize = 4;

pub const MAX_FIBERS: usize = DEFAULT_MAX_FIBERS;

pub const STACK_SIZE: usize = DEFAULT_STACK_SIZE;

/// Ready queue order name (`fifo` or `lifo`)
pub const QUEUE_ORDER: &str = "fifo";

pub const IDLE_SPINS: u32 = 16;

pub const PARK_TIMEOUT_MS: u64 = 10;

pub const DEBUG_LOGGING: bool = cfg!(feature = "debug-logging");

/// Upper bound on fibers a single pool may reserve stacks for
pub const MAX_FIBERS_LIMIT: usize = 1 << 20;

/// Worker count: hardware concurrency, capped at `MAX_WORKERS`
pub fn num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_NUM_WORKERS)
        .min(MAX_WORKERS)
}
