//! Ready Queue abstraction for request dispatch
//!
//! Holds everything eligible to run now: freshly submitted tasks (which
//! need a stack) and resumed fibers (which already own one).
//!
//! # Implementations
//! - `SharedQueue` - one mutex-guarded queue shared by all workers of a pool

mod shared;

pub use shared::SharedQueue;

use std::fmt;
use std::sync::{Arc, Weak};

use lazyreq_core::header::TaskHeader;
use lazyreq_core::spinlock::SpinLock;

use crate::fiber::FiberRef;

/// Body of a submitted request
pub type TaskBody = Box<dyn FnOnce() + Send + 'static>;

struct Startable {
    header: Arc<TaskHeader>,
    /// Taken by whoever starts the task: a worker or a waiter
    body: SpinLock<Option<TaskBody>>,
}

/// A submitted request that has not been dispatched yet
///
/// Holds no stack, only the boxed body. Dropping an undispatched task
/// drops its body without running it.
pub struct Task {
    shared: Arc<Startable>,
}

impl Task {
    pub fn new(header: Arc<TaskHeader>, body: TaskBody) -> Self {
        Self {
            shared: Arc::new(Startable {
                header,
                body: SpinLock::new(Some(body)),
            }),
        }
    }

    #[inline]
    pub fn header(&self) -> &Arc<TaskHeader> {
        &self.shared.header
    }

    /// Already started by a waiter; the queue entry is stale
    pub fn is_started(&self) -> bool {
        self.shared.body.lock().is_none()
    }

    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        self.shared.body.lock().take()
    }

    pub(crate) fn claim(&self, pool: u32) -> TaskClaim {
        TaskClaim {
            task: Arc::downgrade(&self.shared),
            pool,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("header", self.header()).finish()
    }
}

/// Lets a waiter start a queued task itself instead of waiting for a
/// worker to dispatch it
///
/// Holds the task weakly: once the queue drops it, unrun, the claim is
/// dead and the body has been dropped.
#[derive(Clone)]
pub struct TaskClaim {
    task: Weak<Startable>,
    pool: u32,
}

impl TaskClaim {
    /// Pool the task was submitted to
    #[inline]
    pub fn pool(&self) -> u32 {
        self.pool
    }

    /// Still queued with nobody having started it
    pub fn is_queued(&self) -> bool {
        self.task
            .upgrade()
            .is_some_and(|task| task.body.lock().is_some())
    }

    pub(crate) fn take(&self) -> Option<(Arc<TaskHeader>, TaskBody)> {
        let task = self.task.upgrade()?;
        let body = task.body.lock().take()?;
        Some((Arc::clone(&task.header), body))
    }
}

impl fmt::Debug for TaskClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskClaim")
            .field("pool", &self.pool)
            .field("queued", &self.is_queued())
            .finish()
    }
}

/// Something a worker can run
pub enum ReadyEntry {
    /// Fresh task: needs a stack slot before it can start
    Spawn(Task),
    /// Suspended or yielded fiber ready to continue
    Resume(FiberRef),
}

impl ReadyEntry {
    #[inline]
    pub fn is_resume(&self) -> bool {
        matches!(self, ReadyEntry::Resume(_))
    }
}

/// Trait for ready queue implementations
///
/// All implementations must be thread-safe (Send + Sync). Waking parked
/// workers is the scheduler's job, not the queue's.
pub trait ReadyQueue: Send + Sync {
    /// Make an entry ready to run
    ///
    /// Hands the entry back if the queue was closed.
    fn push(&self, entry: ReadyEntry) -> Result<(), ReadyEntry>;

    /// Put back an entry just taken by `pop` so it is next in line again
    fn requeue(&self, entry: ReadyEntry) -> Result<(), ReadyEntry>;

    /// Next entry to run
    ///
    /// Resumed fibers are preferred over fresh tasks. With `accept_fresh`
    /// false only resumed fibers are returned (used while stacks are
    /// exhausted). Returns `None` while paused.
    fn pop(&self, accept_fresh: bool) -> Option<ReadyEntry>;

    /// Stop handing out entries; pushes are still accepted
    fn pause(&self);

    fn unpause(&self);

    fn is_paused(&self) -> bool;

    /// Refuse further pushes and return everything still queued
    fn close(&self) -> Vec<ReadyEntry>;

    fn is_closed(&self) -> bool;

    /// Number of queued entries (for diagnostics)
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
