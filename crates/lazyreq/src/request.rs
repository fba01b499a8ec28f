//! The request handle
//!
//! A [`Request`] is a shared handle to one task: its body, its outcome
//! slot, the callbacks to run when it completes and the fibers or threads
//! waiting for it. Constructing one submits it.
//!
//! Completion order is what gives fan-in its guarantee:
//!
//! 1. the outcome is stored
//! 2. notify callbacks are drained, in registration order, until none are
//!    left (a callback may register more)
//! 3. under the same lock that saw the list empty, the request becomes
//!    terminal and its state flips to `Finished`/`Failed`
//! 4. blocked threads and suspended waiters are released
//!
//! So no `wait()` returns, and no observer sees `finished()`, before every
//! callback has run.

use std::cell::Cell;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};

use lazyreq_core::{kdebug, kerror, kwarn};
use lazyreq_core::{BoxError, RequestError, RequestId, RequestState, TaskHeader};
use lazyreq_runtime::{
    current_request_id, current_scheduler, in_fiber, run_inline, Inline, Pool, Scheduler,
    SuspendRecord, Task, TaskClaim,
};

use crate::waitable::{self, Waitable};

type Callback<T> = Box<dyn FnOnce(Result<&T, &RequestError>) + Send + 'static>;

thread_local! {
    // Request whose callbacks are being drained on this thread when that
    // happens outside a fiber (abandonment during shutdown)
    static COMPLETING: Cell<u64> = const { Cell::new(0) };
}

struct Guarded<T> {
    callbacks: Vec<Callback<T>>,
    waiters: Vec<Arc<SuspendRecord>>,
    terminal: bool,
}

struct Inner<T> {
    header: Arc<TaskHeader>,
    /// Lets a waiter start the request itself while it is still queued
    start: OnceLock<TaskClaim>,
    outcome: OnceLock<Result<T, RequestError>>,
    guarded: Mutex<Guarded<T>>,
    done: Condvar,
}

impl<T> Inner<T>
where
    T: Send + Sync + 'static,
{
    fn new(header: Arc<TaskHeader>) -> Self {
        Self {
            header,
            start: OnceLock::new(),
            outcome: OnceLock::new(),
            guarded: Mutex::new(Guarded {
                callbacks: Vec::new(),
                waiters: Vec::new(),
                terminal: false,
            }),
            done: Condvar::new(),
        }
    }

    fn id(&self) -> RequestId {
        self.header.id()
    }

    // Callbacks never run with the lock held, so a poisoned lock only means
    // a panic in our own bookkeeping; the data is still consistent.
    fn lock(&self) -> MutexGuard<'_, Guarded<T>> {
        self.guarded.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_terminal(&self) -> bool {
        self.lock().terminal
    }

    fn complete(&self, outcome: Result<T, RequestError>) {
        if self.outcome.set(outcome).is_err() {
            kwarn!("request {} completed twice; keeping the first outcome", self.id());
            return;
        }
        let Some(outcome) = self.outcome.get() else {
            return;
        };
        let result = outcome.as_ref();

        let previous = if in_fiber() {
            None
        } else {
            Some(COMPLETING.with(|c| c.replace(self.id().as_u64())))
        };

        let waiters = loop {
            let batch = {
                let mut guarded = self.lock();
                if guarded.callbacks.is_empty() {
                    guarded.terminal = true;
                    let state = if result.is_ok() {
                        RequestState::Finished
                    } else {
                        RequestState::Failed
                    };
                    self.header.transition(state);
                    break mem::take(&mut guarded.waiters);
                }
                mem::take(&mut guarded.callbacks)
            };
            for callback in batch {
                run_callback(self.id(), callback, result);
            }
        };

        if let Some(previous) = previous {
            COMPLETING.with(|c| c.set(previous));
        }

        self.done.notify_all();
        for record in waiters {
            record.child_done();
        }
    }
}

impl<T> Waitable for Inner<T>
where
    T: Send + Sync + 'static,
{
    fn start_here(&self) -> Inline {
        match self.start.get() {
            Some(claim) => run_inline(claim),
            None => Inline::Skipped,
        }
    }

    fn add_waiter(&self, record: &Arc<SuspendRecord>) -> bool {
        let mut guarded = self.lock();
        if guarded.terminal {
            return false;
        }
        guarded.waiters.push(Arc::clone(record));
        true
    }

    fn block_until_terminal(&self) {
        let mut guarded = self.lock();
        while !guarded.terminal {
            guarded = self.done.wait(guarded).unwrap_or_else(|e| e.into_inner());
        }
    }
}

fn run_callback<T>(id: RequestId, callback: Callback<T>, result: Result<&T, &RequestError>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(result))) {
        kerror!(
            "notify callback of request {} panicked: {}",
            id,
            RequestError::from_panic(payload)
        );
    }
}

/// Completes its request when the body returns, or with `Abandoned` if the
/// body is dropped without running.
struct Completer<T>
where
    T: Send + Sync + 'static,
{
    inner: Option<Arc<Inner<T>>>,
}

impl<T> Completer<T>
where
    T: Send + Sync + 'static,
{
    fn complete(mut self, outcome: Result<T, RequestError>) {
        if let Some(inner) = self.inner.take() {
            inner.complete(outcome);
        }
    }
}

impl<T> Drop for Completer<T>
where
    T: Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            kdebug!("request {} dropped before it ran", inner.id());
            inner.complete(Err(RequestError::Abandoned));
        }
    }
}

/// Handle to a submitted request
///
/// Cheap to clone; all clones refer to the same task.
pub struct Request<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Request<T>
where
    T: Send + Sync + 'static,
{
    /// Submit `f` to the pool running the caller, or to the global pool
    /// when called from outside any pool
    ///
    /// # Panics
    ///
    /// From outside any pool, if the global pool does not exist yet and
    /// cannot be started from the environment. [`crate::init`] reports
    /// that as an error instead.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::submit_to(&target(), move || Ok(f()))
    }

    /// Submit a fallible body; an `Err` fails the request
    ///
    /// Panics like [`Request::new`] if the global pool cannot be started.
    ///
    /// ```ignore
    /// let parent = Request::try_new(|| {
    ///     let header = read_header.wait()?;
    ///     Ok::<_, RequestError>(header.len())
    /// });
    /// ```
    pub fn try_new<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::submit_to(&target(), move || f().map_err(RequestError::failed))
    }

    /// Submit `f` to a specific pool
    pub fn new_in<F>(pool: &Pool, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::submit_to(pool.scheduler(), move || Ok(f()))
    }

    /// Submit a fallible body to a specific pool
    pub fn try_new_in<F, E>(pool: &Pool, f: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::submit_to(pool.scheduler(), move || f().map_err(RequestError::failed))
    }

    fn submit_to<F>(scheduler: &Scheduler, f: F) -> Self
    where
        F: FnOnce() -> Result<T, RequestError> + Send + 'static,
    {
        let parent = current_request_id().unwrap_or(RequestId::NONE);
        let header = Arc::new(TaskHeader::new(RequestId::next(), parent));
        let inner = Arc::new(Inner::new(Arc::clone(&header)));

        let completer = Completer {
            inner: Some(Arc::clone(&inner)),
        };
        let body = move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(outcome) => outcome,
                Err(payload) => Err(RequestError::from_panic(payload)),
            };
            if let Err(e) = &outcome {
                kdebug!("request failed: {}", e);
            }
            completer.complete(outcome);
        };

        let claim = scheduler.submit(Task::new(header, Box::new(body)));
        let _ = inner.start.set(claim);
        Self { inner }
    }

    #[inline]
    pub fn id(&self) -> RequestId {
        self.inner.id()
    }

    /// Request that was running when this one was constructed
    pub fn parent(&self) -> Option<RequestId> {
        self.inner.header.parent().to_option()
    }

    #[inline]
    pub fn state(&self) -> RequestState {
        self.inner.header.state()
    }

    /// True once the request completed with a value
    ///
    /// Never true while notify callbacks are still running.
    #[inline]
    pub fn finished(&self) -> bool {
        self.state() == RequestState::Finished
    }

    /// True once the request completed with a fault
    #[inline]
    pub fn failed(&self) -> bool {
        self.state() == RequestState::Failed
    }

    /// Register a completion callback
    ///
    /// If the request is already terminal the callback runs before this
    /// returns. Otherwise it runs exactly once, on whichever thread
    /// completes the request, before the request is observably terminal.
    /// Callbacks run in registration order and also run on failure.
    pub fn notify<F>(&self, callback: F)
    where
        F: FnOnce(Result<&T, &RequestError>) + Send + 'static,
    {
        {
            let mut guarded = self.inner.lock();
            if !guarded.terminal {
                guarded.callbacks.push(Box::new(callback));
                return;
            }
        }
        if let Some(outcome) = self.inner.outcome.get() {
            run_callback(self.id(), Box::new(callback), outcome.as_ref());
        }
    }

    /// Outcome without waiting, once the request is terminal
    pub fn try_result(&self) -> Option<Result<&T, &RequestError>> {
        if !self.inner.is_terminal() {
            return None;
        }
        self.inner.outcome.get().map(Result::as_ref)
    }

    /// True if waiting on this request from here could never return
    pub(crate) fn is_self_wait(&self) -> bool {
        let id = self.id();
        match current_request_id() {
            Some(current) => current == id,
            None => COMPLETING.with(|c| c.get()) == id.as_u64(),
        }
    }

    pub(crate) fn as_waitable(&self) -> &dyn Waitable {
        &*self.inner
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.inner.is_terminal()
    }
}

impl<T> Request<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wait for the request and return its outcome
    ///
    /// Inside a pool the calling request is suspended and its worker moves
    /// on to other work; elsewhere the calling thread blocks. Waiting again
    /// returns the same outcome without suspending.
    pub fn wait(&self) -> Result<T, RequestError> {
        if self.is_self_wait() {
            return Err(RequestError::WaitOnSelf(self.id()));
        }
        if !self.is_terminal() {
            waitable::wait_for(&[self.as_waitable()]);
        }
        self.outcome()
    }

    pub(crate) fn outcome(&self) -> Result<T, RequestError> {
        match self.inner.outcome.get() {
            Some(outcome) => outcome.clone(),
            // Terminal implies the outcome was stored first
            None => Err(RequestError::Abandoned),
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.inner.header.id())
            .field("state", &self.inner.header.state())
            .finish()
    }
}

/// Pool new requests go to: the caller's own, else the global one
fn target() -> Arc<Scheduler> {
    match current_scheduler() {
        Some(scheduler) => scheduler,
        None => Arc::clone(lazyreq_runtime::global().scheduler()),
    }
}
