//! Suspension and resumption of the running fiber
//!
//! A fiber parks by calling [`suspend_current`] with a registration
//! closure. The closure receives a [`Wakeup`] and runs on the worker's
//! own stack *after* the fiber's registers are saved, so whoever it hands
//! the `Wakeup` to may resume the fiber immediately without racing the
//! switch.
//!
//! [`SuspendRecord`] is the counting form of this: a parent waiting on N
//! children parks once and is resumed by whichever of them finishes last.
//!
//! Before parking, a parent starts each child still sitting in its own
//! pool's queue with [`run_inline`]. A parent therefore only parks on
//! children that already hold a stack, so a pool whose stacks are all
//! taken by waiting parents still makes progress.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazyreq_core::error::{SchedError, SchedResult};
use lazyreq_core::id::RequestId;
use lazyreq_core::spinlock::SpinLock;

use crate::fiber::{Fiber, FiberRef, SwitchReason};
use crate::ready_queue::TaskClaim;
use crate::scheduler::Scheduler;
use crate::tls;

/// Capability to resume one suspended fiber
///
/// Consumed by [`Wakeup::wake`]. Dropping it without waking discards the
/// fiber, and whatever waits on its request is never released.
pub struct Wakeup {
    fiber: FiberRef,
}

impl Wakeup {
    pub(crate) fn new(fiber: FiberRef) -> Self {
        Self { fiber }
    }

    /// Request whose fiber this wakes
    #[inline]
    pub fn request_id(&self) -> RequestId {
        self.fiber.request_id()
    }

    /// Put the fiber back on its pool's ready queue
    pub fn wake(self) {
        let scheduler = Arc::clone(self.fiber.scheduler());
        scheduler.resume(self.fiber);
    }
}

impl fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wakeup").field("request", &self.request_id()).finish()
    }
}

/// Park the running fiber until the [`Wakeup`] passed to `register` is woken
///
/// Returns `Err(SchedError::NotInFiber)` when called outside a fiber; the
/// caller should block its thread by other means.
pub fn suspend_current<F>(register: F) -> SchedResult<()>
where
    F: FnOnce(Wakeup) + Send + 'static,
{
    let fiber = tls::current_fiber();
    if fiber.is_null() {
        return Err(SchedError::NotInFiber);
    }
    unsafe {
        Fiber::switch_out(fiber, SwitchReason::Suspend(Box::new(register)));
    }
    Ok(())
}

/// Let other ready work run before continuing
///
/// Outside a fiber this yields the OS thread.
pub fn yield_now() {
    let fiber = tls::current_fiber();
    if fiber.is_null() {
        std::thread::yield_now();
        return;
    }
    unsafe {
        Fiber::switch_out(fiber, SwitchReason::Yield);
    }
}

/// What [`run_inline`] did with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inline {
    /// Ran to completion on the caller's stack
    Ran,
    /// Started elsewhere, or not ours to run from here
    Skipped,
    /// Still queued, but its pool is paused
    Held,
}

/// Start a queued task on the running fiber's stack
///
/// Only tasks of the caller's own pool are taken, never while that pool
/// is paused, and only while at least half of the caller's stack is free.
/// The call returns when the task's body returns, which may be on
/// another worker if the body suspends.
pub fn run_inline(claim: &TaskClaim) -> Inline {
    let fiber = tls::current_fiber();
    if fiber.is_null() {
        return Inline::Skipped;
    }
    let scheduler = unsafe { (*fiber).scheduler() };
    if scheduler.id() != claim.pool() {
        return Inline::Skipped;
    }
    if scheduler.is_paused() {
        return if claim.is_queued() {
            Inline::Held
        } else {
            Inline::Skipped
        };
    }
    if !unsafe { Fiber::has_headroom(fiber) } {
        return Inline::Skipped;
    }
    match claim.take() {
        Some((header, body)) => {
            unsafe { Fiber::run_nested(fiber, header, body) };
            Inline::Ran
        }
        None => Inline::Skipped,
    }
}

/// Check if we're running inside a request
#[inline]
pub fn in_fiber() -> bool {
    tls::in_fiber()
}

/// Request whose fiber is running on this thread
pub fn current_request_id() -> Option<RequestId> {
    let fiber = tls::current_fiber();
    if fiber.is_null() {
        None
    } else {
        Some(unsafe { (*fiber).header().id() })
    }
}

/// Pool that owns the running fiber
pub fn current_scheduler() -> Option<Arc<Scheduler>> {
    let fiber = tls::current_fiber();
    if fiber.is_null() {
        None
    } else {
        Some(Arc::clone(unsafe { (*fiber).scheduler() }))
    }
}

/// Countdown shared between a suspended parent and the children it waits on
///
/// The count starts at `children + 1`. Each finished child takes one off;
/// arming with the parent's [`Wakeup`] takes the extra one. Whoever brings
/// it to zero wakes the parent, so the parent can never be woken before it
/// is fully parked, and is woken exactly once.
pub struct SuspendRecord {
    outstanding: AtomicUsize,
    wakeup: SpinLock<Option<Wakeup>>,
}

impl SuspendRecord {
    pub fn new(children: usize) -> Arc<Self> {
        Arc::new(Self {
            outstanding: AtomicUsize::new(children + 1),
            wakeup: SpinLock::new(None),
        })
    }

    /// Children not yet reported done
    #[inline]
    pub fn remaining(&self) -> usize {
        self.outstanding.load(Ordering::Acquire).saturating_sub(1)
    }

    /// Hand over the parent's wakeup; wakes at once if every child is done
    pub fn arm(&self, wakeup: Wakeup) {
        *self.wakeup.lock() = Some(wakeup);
        self.release_one();
    }

    /// Report one child terminal
    pub fn child_done(&self) {
        self.release_one();
    }

    fn release_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let wakeup = self.wakeup.lock().take();
            if let Some(wakeup) = wakeup {
                wakeup.wake();
            }
        }
    }
}

impl fmt::Debug for SuspendRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendRecord")
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspend_outside_fiber() {
        assert_eq!(suspend_current(|_wakeup| {}), Err(SchedError::NotInFiber));
        assert!(current_request_id().is_none());
        assert!(current_scheduler().is_none());

        let header = std::sync::Arc::new(lazyreq_core::header::TaskHeader::new(
            RequestId::next(),
            RequestId::NONE,
        ));
        let task = crate::ready_queue::Task::new(header, Box::new(|| {}));
        assert_eq!(run_inline(&task.claim(0)), Inline::Skipped);
        assert!(!task.is_started());
        // Plain thread yield
        yield_now();
    }

    #[test]
    fn test_record_counts_children() {
        let record = SuspendRecord::new(3);
        assert_eq!(record.remaining(), 3);
        record.child_done();
        record.child_done();
        assert_eq!(record.remaining(), 1);
        record.child_done();
        assert_eq!(record.remaining(), 0);
    }
}
