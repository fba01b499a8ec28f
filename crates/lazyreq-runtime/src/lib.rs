//! # lazyreq-runtime
//!
//! Fiber runtime for the lazyreq request engine.
//!
//! This crate provides:
//! - Stack memory (one mmap'd region of guard-paged slots per pool)
//! - Context switching (architecture-specific naked functions)
//! - Ready queue with pause/unpause
//! - Worker threads with futex (or condvar) parking
//! - Suspension primitives (`suspend_current`, `Wakeup`, `SuspendRecord`)
//!   and `run_inline` for starting a queued task on the waiter's stack
//! - Private pools and the process-wide global pool

pub mod config;
pub mod memory;
pub mod arch;
pub mod parking;
pub mod ready_queue;
pub mod fiber;
pub mod suspend;
pub mod tls;
pub mod worker;
pub mod scheduler;
pub mod pool;

// Re-exports
pub use config::{PoolConfig, QueueOrder};
pub use pool::{global, init_global, try_global, Pool, PoolError, PoolResult};
pub use ready_queue::{Task, TaskBody, TaskClaim};
pub use scheduler::Scheduler;
pub use suspend::{
    current_request_id, current_scheduler, in_fiber, run_inline, suspend_current, yield_now,
    Inline, SuspendRecord, Wakeup,
};
pub use parking::{new_parking, WorkerParking};
