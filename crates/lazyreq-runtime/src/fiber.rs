//! Stackful fibers
//!
//! A fiber is a dispatched request running on its own stack slot. The
//! `Fiber` record lives on the heap and is owned by exactly one
//! [`FiberRef`] at a time: the worker running it, a [`Wakeup`] parked on
//! some request, or a `Resume` entry in the ready queue. Dropping the
//! `FiberRef` frees the record and returns the stack slot.
//!
//! A fiber usually runs one request. A request waiting on a task still in
//! the queue may start that task on its own stack instead (see
//! [`run_inline`]); while the nested body runs, the fiber stands for the
//! nested request.
//!
//! [`Wakeup`]: crate::suspend::Wakeup
//! [`run_inline`]: crate::suspend::run_inline

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;

use lazyreq_core::error::RequestError;
use lazyreq_core::header::TaskHeader;
use lazyreq_core::id::{RequestId, SlotId};
use lazyreq_core::state::RequestState;
use lazyreq_core::{kerror, kprint, kwarn};

use crate::arch::{self, SavedRegs};
use crate::ready_queue::TaskBody;
use crate::scheduler::Scheduler;
use crate::suspend::Wakeup;
use crate::tls;

/// Why a fiber switched back to its worker
pub(crate) enum SwitchReason {
    /// Re-queue immediately
    Yield,
    /// Park; the closure runs on the worker stack once registers are saved
    Suspend(Box<dyn FnOnce(Wakeup) + Send>),
    /// Body returned; the stack can be recycled
    Finished,
}

pub(crate) struct Fiber {
    /// Saved context while switched out
    regs: SavedRegs,
    /// Context of the worker that switched us in (changes on migration)
    sched_ctx: *mut SavedRegs,
    reason: Option<SwitchReason>,
    body: Option<TaskBody>,
    started: bool,
    finished: bool,
    /// Innermost request running on this stack
    active: Arc<TaskHeader>,
    slot: SlotId,
    scheduler: Arc<Scheduler>,
}

impl Fiber {
    /// Switch from the running fiber back to its worker
    ///
    /// Returns once some worker switches the fiber in again.
    ///
    /// # Safety
    ///
    /// `fiber` must be the fiber currently running on this thread.
    pub(crate) unsafe fn switch_out(fiber: *mut Fiber, reason: SwitchReason) {
        (*fiber).reason = Some(reason);
        arch::context_switch(&raw mut (*fiber).regs, (*fiber).sched_ctx);
    }

    #[inline]
    pub(crate) fn header(&self) -> &Arc<TaskHeader> {
        &self.active
    }

    #[inline]
    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Is at least half of the stack still free below the caller's frame?
    ///
    /// # Safety
    ///
    /// `fiber` must be the fiber currently running on this thread.
    #[inline(never)]
    pub(crate) unsafe fn has_headroom(fiber: *mut Fiber) -> bool {
        let marker = 0u8;
        let here = std::hint::black_box(&marker) as *const u8 as usize;
        let region = (*fiber).scheduler.region();
        let bottom = region.stack_bottom((*fiber).slot) as usize;
        here.saturating_sub(bottom) > region.stack_size() / 2
    }

    /// Run another request's body on this fiber's stack
    ///
    /// The outer request counts as suspended until the body returns. The
    /// body may itself suspend the fiber and come back on another worker.
    ///
    /// # Safety
    ///
    /// `fiber` must be the fiber currently running on this thread.
    pub(crate) unsafe fn run_nested(fiber: *mut Fiber, header: Arc<TaskHeader>, body: TaskBody) {
        let id = header.id();
        let outer = std::mem::replace(&mut (*fiber).active, Arc::clone(&header));
        outer.transition(RequestState::Suspended);
        header.transition(RequestState::Running);
        kprint::set_request_id(id.as_u64());

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
            kerror!("unhandled fault in request {}: {}", id, RequestError::from_panic(payload));
        }

        kprint::set_request_id(outer.id().as_u64());
        outer.transition(RequestState::Running);
        (*fiber).active = outer;
    }
}

/// Owning handle to a fiber that is not currently running
pub struct FiberRef {
    ptr: NonNull<Fiber>,
}

// A FiberRef is the unique owner of its fiber; the fiber is only touched
// by whichever thread holds the handle.
unsafe impl Send for FiberRef {}

impl FiberRef {
    /// Build a fiber for a task body on an activated stack slot
    pub(crate) fn new(
        header: Arc<TaskHeader>,
        body: TaskBody,
        slot: SlotId,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let stack_top = scheduler.region().stack_top(slot);
        let fiber = Box::new(Fiber {
            regs: SavedRegs::default(),
            sched_ctx: std::ptr::null_mut(),
            reason: None,
            body: Some(body),
            started: false,
            finished: false,
            active: header,
            slot,
            scheduler,
        });
        let ptr = NonNull::from(Box::leak(fiber));
        unsafe {
            let raw = ptr.as_ptr();
            arch::init_context(&mut (*raw).regs, stack_top, fiber_entry, raw as usize);
        }
        Self { ptr }
    }

    #[inline]
    fn fiber(&self) -> &Fiber {
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    pub fn request_id(&self) -> RequestId {
        self.fiber().active.id()
    }

    #[inline]
    pub(crate) fn header(&self) -> &Arc<TaskHeader> {
        &self.fiber().active
    }

    #[inline]
    pub(crate) fn scheduler(&self) -> &Arc<Scheduler> {
        &self.fiber().scheduler
    }

    #[inline]
    pub(crate) fn slot(&self) -> SlotId {
        self.fiber().slot
    }

    /// Run the fiber until it yields, suspends or finishes
    ///
    /// # Safety
    ///
    /// `sched_ctx` must be the calling worker's context save area and stay
    /// valid until this returns.
    pub(crate) unsafe fn switch_in(&mut self, sched_ctx: *mut SavedRegs) -> SwitchReason {
        let raw = self.ptr.as_ptr();
        (*raw).sched_ctx = sched_ctx;
        (*raw).started = true;
        tls::set_current_fiber(raw);
        arch::context_switch(sched_ctx, &raw const (*raw).regs);
        tls::clear_current_fiber();
        (*raw).reason.take().unwrap_or(SwitchReason::Finished)
    }
}

impl Drop for FiberRef {
    fn drop(&mut self) {
        let fiber = unsafe { Box::from_raw(self.ptr.as_ptr()) };
        if fiber.started && !fiber.finished {
            // Nothing on the stack is dropped, and the request never
            // completes: anything waiting on it stays blocked for good
            kwarn!(
                "request {} dropped while suspended; its stack is discarded without \
                 unwinding, leaking what it holds, and its waiters are never released",
                fiber.active.id()
            );
        }
        fiber.scheduler.release_slot(fiber.slot);
    }
}

impl fmt::Debug for FiberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRef")
            .field("request", &self.request_id())
            .field("slot", &self.slot())
            .finish()
    }
}

/// First Rust frame on every fiber stack
extern "C" fn fiber_entry(arg: usize) -> ! {
    let fiber = arg as *mut Fiber;
    run_body(fiber);
    unsafe {
        (*fiber).finished = true;
        Fiber::switch_out(fiber, SwitchReason::Finished);
    }
    // A finished fiber is dropped, never switched in again
    std::process::abort()
}

#[inline(never)]
fn run_body(fiber: *mut Fiber) {
    let body = unsafe { (*fiber).body.take() };
    if let Some(body) = body {
        // Unwinding must not reach the trampoline
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
            kerror!("unhandled fault in request body: {}", RequestError::from_panic(payload));
        }
    }
}
