//! Worker pools
//!
//! A [`Pool`] owns a scheduler and its worker threads. Private pools are
//! built with [`Pool::new`] and shut down when dropped; the process-wide
//! pool is installed once with [`init_global`] or created lazily by
//! [`global`].

use std::sync::{Arc, Mutex, OnceLock};

use lazyreq_core::error::SchedError;
use lazyreq_core::{kdebug, kerror, kinfo};

use crate::config::PoolConfig;
use crate::ready_queue::{Task, TaskClaim};
use crate::scheduler::Scheduler;
use crate::worker::WorkerPool;

/// Errors raised while building or installing a pool
pub type PoolError = SchedError;

pub type PoolResult<T> = Result<T, PoolError>;

/// A fixed set of worker threads multiplexing fibers
pub struct Pool {
    scheduler: Arc<Scheduler>,
    workers: Mutex<Option<WorkerPool>>,
}

impl Pool {
    /// Build a pool and start its workers
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        if config.debug_logging {
            config.print();
        }
        let scheduler = Scheduler::new(config)?;
        let workers = WorkerPool::start(&scheduler)?;

        kdebug!(
            "pool {} up: {} workers, {} stacks of {} bytes",
            scheduler.id(),
            workers.num_workers(),
            scheduler.config().max_fibers,
            scheduler.config().stack_size
        );

        Ok(Self {
            scheduler,
            workers: Mutex::new(Some(workers)),
        })
    }

    /// Build a pool from defaults and `LAZYREQ_*` environment overrides
    pub fn from_env() -> PoolResult<Self> {
        Self::new(PoolConfig::from_env())
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        self.scheduler.config()
    }

    /// Queue a task on this pool
    pub fn submit(&self, task: Task) -> TaskClaim {
        self.scheduler.submit(task)
    }

    /// Stop dispatching; idempotent
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    /// Resume dispatching; idempotent
    pub fn unpause(&self) {
        self.scheduler.unpause();
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    /// Entries waiting to be dispatched or resumed
    #[inline]
    pub fn queued(&self) -> usize {
        self.scheduler.queued()
    }

    /// Dispatched requests that have not finished
    #[inline]
    pub fn live_fibers(&self) -> usize {
        self.scheduler.live_fibers()
    }

    /// Most requests ever dispatched and unfinished at once
    #[inline]
    pub fn peak_fibers(&self) -> usize {
        self.scheduler.peak_fibers()
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.scheduler.config().num_workers
    }

    /// Stop the workers and drop everything still queued
    ///
    /// Queued tasks are dropped without running. Fibers suspended at this
    /// point are discarded if they are ever woken, without unwinding; their
    /// requests never complete and anything waiting on them stays blocked.
    /// Idempotent.
    pub fn shutdown(&self) {
        let workers = self.workers.lock().unwrap().take();
        let Some(workers) = workers else {
            return;
        };

        let drained = self.scheduler.stop();
        workers.join();

        kdebug!(
            "pool {} shut down, {} queued entries dropped",
            self.scheduler.id(),
            drained.len()
        );
        drop(drained);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

static GLOBAL: OnceLock<Pool> = OnceLock::new();

/// Install the process-wide pool with an explicit configuration
///
/// Fails with `AlreadyInitialized` if the global pool exists, whether from
/// an earlier call or from lazy creation.
pub fn init_global(config: PoolConfig) -> PoolResult<&'static Pool> {
    if GLOBAL.get().is_some() {
        return Err(SchedError::AlreadyInitialized);
    }
    let pool = Pool::new(config)?;
    GLOBAL.set(pool).map_err(|_| SchedError::AlreadyInitialized)?;
    kinfo!("global request pool initialized");
    Ok(global())
}

/// The process-wide pool, created from the environment on first use
///
/// # Panics
///
/// If the pool has to be created here and cannot be (bad `LAZYREQ_*`
/// values, stack region mapping or worker spawn failure). Call
/// [`init_global`] first to handle that as an error.
pub fn global() -> &'static Pool {
    GLOBAL.get_or_init(|| start_or_panic(PoolConfig::from_env()))
}

fn start_or_panic(config: PoolConfig) -> Pool {
    match Pool::new(config) {
        Ok(pool) => pool,
        Err(e) => {
            kerror!("cannot start the global request pool: {}", e);
            panic!("cannot start the global request pool: {}", e);
        }
    }
}

/// The process-wide pool if it has been created
pub fn try_global() -> Option<&'static Pool> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspend::{
        current_request_id, current_scheduler, run_inline, suspend_current, yield_now, Inline,
        SuspendRecord,
    };
    use lazyreq_core::header::TaskHeader;
    use lazyreq_core::id::RequestId;
    use lazyreq_core::state::RequestState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn small_pool(workers: usize) -> Pool {
        Pool::new(PoolConfig::new().num_workers(workers).max_fibers(64)).unwrap()
    }

    fn task<F: FnOnce() + Send + 'static>(f: F) -> (Arc<TaskHeader>, Task) {
        let header = Arc::new(TaskHeader::new(RequestId::next(), RequestId::NONE));
        (Arc::clone(&header), Task::new(header, Box::new(f)))
    }

    #[test]
    fn test_task_runs_on_fiber() {
        let pool = small_pool(2);
        let (tx, rx) = mpsc::channel();
        let (header, t) = task(move || {
            tx.send(current_request_id()).unwrap();
        });
        let id = header.id();
        pool.submit(t);

        let seen = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(seen, Some(id));
    }

    #[test]
    fn test_suspend_and_wake_from_outside() {
        let pool = small_pool(1);
        let (wake_tx, wake_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let (header, t) = task(move || {
            suspend_current(move |wakeup| wake_tx.send(wakeup).unwrap()).unwrap();
            done_tx.send(()).unwrap();
        });
        pool.submit(t);

        let wakeup = wake_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(wakeup.request_id(), header.id());
        assert_eq!(header.state(), RequestState::Suspended);
        assert!(done_rx.try_recv().is_err());
        assert_eq!(pool.live_fibers(), 1);

        wakeup.wake();
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_suspend_record_wakes_once_all_children_done() {
        let pool = small_pool(2);
        let record = SuspendRecord::new(2);
        let (done_tx, done_rx) = mpsc::channel();

        let parent_record = Arc::clone(&record);
        let (_, t) = task(move || {
            suspend_current(move |wakeup| parent_record.arm(wakeup)).unwrap();
            done_tx.send(()).unwrap();
        });
        pool.submit(t);

        std::thread::sleep(Duration::from_millis(20));
        record.child_done();
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        record.child_done();
        done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_yield_interleaves_on_one_worker() {
        let pool = small_pool(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..2 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            let (_, t) = task(move || {
                for _ in 0..100 {
                    counter.fetch_add(1, Ordering::SeqCst);
                    yield_now();
                }
                tx.send(()).unwrap();
            });
            pool.submit(t);
        }

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn test_pause_holds_queue() {
        let pool = small_pool(2);
        pool.pause();
        assert!(pool.is_paused());

        let (tx, rx) = mpsc::channel();
        let (header, t) = task(move || tx.send(()).unwrap());
        pool.submit(t);

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(header.state(), RequestState::Pending);
        assert_eq!(pool.queued(), 1);

        pool.unpause();
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_stack_exhaustion_defers() {
        let pool = Pool::new(PoolConfig::new().num_workers(2).max_fibers(2)).unwrap();
        let (wake_tx, wake_rx) = mpsc::channel();
        let ran = Arc::new(AtomicUsize::new(0));

        // Two suspended fibers hold both stacks
        for _ in 0..2 {
            let wake_tx = wake_tx.clone();
            let (_, t) = task(move || {
                suspend_current(move |w| wake_tx.send(w).unwrap()).unwrap();
            });
            pool.submit(t);
        }
        let w1 = wake_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let w2 = wake_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(pool.live_fibers(), 2);

        let ran2 = Arc::clone(&ran);
        let (_, t) = task(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        pool.submit(t);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        w1.wake();
        w2.wake();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while ran.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.peak_fibers(), 2);
    }

    #[test]
    fn test_shutdown_drops_queued_tasks() {
        struct Flag(Arc<AtomicUsize>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let pool = small_pool(1);
        pool.pause();
        let dropped = Arc::new(AtomicUsize::new(0));
        let flag = Flag(Arc::clone(&dropped));
        let (_, t) = task(move || {
            let _flag = flag;
            panic!("must not run");
        });
        pool.submit(t);

        pool.shutdown();
        pool.shutdown(); // idempotent
        assert_eq!(dropped.load(Ordering::SeqCst), 1);

        // Submitting after shutdown drops immediately
        let flag = Flag(Arc::clone(&dropped));
        let (_, t) = task(move || drop(flag));
        pool.submit(t);
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_run_inline_borrows_waiter_stack() {
        let pool = small_pool(1);
        let (tx, rx) = mpsc::channel();

        let (outer, t) = task(move || {
            let child_header = Arc::new(TaskHeader::new(RequestId::next(), RequestId::NONE));
            let seen = Arc::new(Mutex::new(None));
            let (record, header) = (Arc::clone(&seen), Arc::clone(&child_header));
            let child = Task::new(
                Arc::clone(&child_header),
                Box::new(move || {
                    *record.lock().unwrap() = Some((current_request_id(), header.state()));
                }),
            );
            let claim = current_scheduler().unwrap().submit(child);

            let ran = run_inline(&claim);
            let again = run_inline(&claim);
            let nested = seen.lock().unwrap().take();
            tx.send((ran, again, nested, child_header.id(), current_request_id()))
                .unwrap();
        });
        pool.submit(t);

        let (ran, again, nested, child_id, after) =
            rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(ran, Inline::Ran);
        assert_eq!(again, Inline::Skipped);
        assert_eq!(nested, Some((Some(child_id), RequestState::Running)));
        assert_eq!(after, Some(outer.id()));

        // The stale queue entry is dropped without taking a stack
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while pool.queued() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.peak_fibers(), 1);
    }

    #[test]
    fn test_run_inline_held_while_paused() {
        let pool = small_pool(1);
        let (tx, rx) = mpsc::channel();

        let (_, t) = task(move || {
            let scheduler = current_scheduler().unwrap();
            let (_, child) = task(|| {});
            let claim = scheduler.submit(child);
            scheduler.pause();
            let held = run_inline(&claim);
            scheduler.unpause();
            tx.send((held, run_inline(&claim))).unwrap();
        });
        pool.submit(t);

        let (held, ran) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(held, Inline::Held);
        assert_eq!(ran, Inline::Ran);
    }

    #[test]
    fn test_run_inline_skips_other_pool() {
        let pool = small_pool(1);
        let other = small_pool(1);
        other.pause();

        let (ran_tx, ran_rx) = mpsc::channel();
        let (_, foreign) = task(move || ran_tx.send(()).unwrap());
        let claim = other.submit(foreign);

        let (tx, rx) = mpsc::channel();
        let (_, t) = task(move || tx.send(run_inline(&claim)).unwrap());
        pool.submit(t);

        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Inline::Skipped);
        other.unpause();
        ran_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_wake_after_shutdown_discards_fiber() {
        let pool = small_pool(1);
        let (wake_tx, wake_rx) = mpsc::channel();
        let (header, t) = task(move || {
            suspend_current(move |w| wake_tx.send(w).unwrap()).unwrap();
        });
        pool.submit(t);

        let wakeup = wake_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        pool.shutdown();
        wakeup.wake();

        // Stack returned, but the request is stuck short of terminal
        assert_eq!(pool.live_fibers(), 0);
        assert_eq!(header.state(), RequestState::Suspended);
    }

    #[test]
    #[should_panic(expected = "cannot start the global request pool")]
    fn test_lazy_start_failure_panics_with_reason() {
        start_or_panic(PoolConfig::new().num_workers(0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Pool::new(PoolConfig::new().num_workers(0)).err();
        assert!(matches!(err, Some(SchedError::Config(_))));
    }
}
