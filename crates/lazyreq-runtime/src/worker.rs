//! Worker thread management
//!
//! Workers are OS threads that run fibers for one pool. Each runs
//! [`worker_main_loop`](crate::scheduler::worker_main_loop) until the
//! pool stops.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use lazyreq_core::error::{SchedError, SchedResult};
use lazyreq_core::{kdebug, kerror};

use crate::scheduler::{worker_main_loop, Scheduler};

/// Threads of one pool
pub struct WorkerPool {
    /// Join handles for worker threads
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `config.num_workers` threads for `scheduler`
    ///
    /// If any thread fails to start, the ones already running are
    /// stopped and joined before the error is returned.
    pub(crate) fn start(scheduler: &Arc<Scheduler>) -> SchedResult<Self> {
        let num_workers = scheduler.config().num_workers;
        let mut pool = Self {
            handles: Vec::with_capacity(num_workers),
        };

        for i in 0..num_workers {
            let sched = Arc::clone(scheduler);
            let spawned = thread::Builder::new()
                .name(format!("lazyreq-{}-worker-{}", scheduler.id(), i))
                .spawn(move || worker_main_loop(sched, i));

            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    kerror!("failed to spawn worker {} of pool {}: {}", i, scheduler.id(), e);
                    drop(scheduler.stop());
                    pool.join();
                    return Err(SchedError::WorkerSpawnFailed);
                }
            }
        }

        kdebug!("pool {} started {} workers", scheduler.id(), num_workers);
        Ok(pool)
    }

    /// Get number of workers
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }

    /// Wait for all workers to finish
    ///
    /// A worker cannot join itself; when called from one of these
    /// threads, that thread is left to exit on its own.
    pub fn join(self) {
        let me = thread::current().id();
        for handle in self.handles {
            if handle.thread().id() == me {
                continue;
            }
            let _ = handle.join();
        }
    }
}
