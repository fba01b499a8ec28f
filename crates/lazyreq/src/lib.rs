//! # lazyreq - Lazy Request Engine
//!
//! Runs arbitrarily deep trees of dependent computations over a small,
//! fixed set of worker threads.
//!
//! ## Features
//!
//! - **Eager dispatch**: constructing a [`Request`] submits it
//! - **Suspending wait**: `wait()` inside a request parks its fiber and frees
//!   the worker; outside a pool it blocks the calling thread
//! - **Fan-in correctness**: a request is observed finished only after all of
//!   its notify callbacks have run
//! - **Pause/unpause**: hold back dispatch without disturbing running work
//! - **Faults are local**: a panicking or failing body marks its own request
//!   failed and is replayed to every waiter
//!
//! ## Quick Start
//!
//! ```ignore
//! use lazyreq::Request;
//!
//! fn main() {
//!     let total = Request::new(|| {
//!         let parts: Vec<Request<u64>> = (0..10u64)
//!             .map(|i| Request::new(move || i * i))
//!             .collect();
//!         lazyreq::wait_all(&parts)
//!             .into_iter()
//!             .map(|r| r.unwrap())
//!             .sum::<u64>()
//!     });
//!
//!     total.notify(|result| println!("done: {:?}", result));
//!     assert_eq!(total.wait().unwrap(), 285);
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        Request::new(), wait(), notify(), wait_all()         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Pool / Scheduler                            │
//! │   ready queue (resumed before fresh), pause, parking        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │      │  Worker   │      │  Worker   │
//!    │  Thread   │      │  Thread   │      │  Thread   │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                  Stack Region                           │
//!    │   guard page + stack per live request, mmap'd once      │
//!    └─────────────────────────────────────────────────────────┘
//! ```

mod request;
mod waitable;


// Re-export core types
pub use lazyreq_core::{BoxError, RequestError, RequestId, RequestState};

// Re-export kprint macros for debug logging
pub use lazyreq_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use lazyreq_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export runtime types
pub use lazyreq_runtime::{
    current_request_id,
    in_fiber,
    yield_now,
    Pool,
    PoolConfig,
    PoolError,
    PoolResult,
    QueueOrder,
};

pub use request::Request;
pub use waitable::wait_all;

/// Install the global pool with an explicit configuration
///
/// Must run before anything touches the global pool; afterwards it fails
/// with [`PoolError::AlreadyInitialized`].
pub fn init(config: PoolConfig) -> PoolResult<()> {
    lazyreq_runtime::init_global(config).map(|_| ())
}

/// The global pool, created from the environment on first use
///
/// Panics if it has to be created here and cannot be; see [`init`].
#[inline]
pub fn global_pool() -> &'static Pool {
    lazyreq_runtime::global()
}

/// Submit a request to the current pool (or the global one)
///
/// Same as [`Request::new`], including its panic when the global pool
/// cannot be started.
pub fn submit<T, F>(f: F) -> Request<T>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Request::new(f)
}

/// Stop the global pool dispatching queued requests
///
/// Requests already running carry on and may submit more work, which
/// queues until [`unpause`]. Idempotent.
pub fn pause() {
    global_pool().pause();
}

/// Let the global pool dispatch again; idempotent
pub fn unpause() {
    global_pool().unpause();
}

#[inline]
pub fn is_paused() -> bool {
    global_pool().is_paused()
}
