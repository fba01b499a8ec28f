//! Per-pool scheduler
//!
//! Orchestrates the components of one pool: stack region, slot
//! allocator, ready queue and worker parking. Workers run
//! [`worker_main_loop`], which pops ready entries and switches into them:
//!
//! - `Spawn` entries get a stack slot and a fresh fiber
//! - `Resume` entries switch straight back into their saved context
//!
//! When the fiber switches back, the reason it gives decides what
//! happens next: re-queue (yield), park (suspend) or recycle (finish).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use lazyreq_core::error::SchedResult;
use lazyreq_core::id::SlotId;
use lazyreq_core::slot::SlotAllocator;
use lazyreq_core::state::RequestState;
use lazyreq_core::{kdebug, kerror, kprint, kwarn};

use crate::arch::SavedRegs;
use crate::config::PoolConfig;
use crate::fiber::{FiberRef, SwitchReason};
use crate::memory::StackRegion;
use crate::parking::{new_parking, WorkerParking};
use crate::ready_queue::{ReadyEntry, ReadyQueue, SharedQueue, Task, TaskClaim};
use crate::suspend::Wakeup;
use crate::tls;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(0);

/// Scheduler state shared by a pool, its workers and its fibers
pub struct Scheduler {
    /// Pool index, used in thread names and logs
    id: u32,

    config: PoolConfig,

    /// Entries eligible to run
    queue: Box<dyn ReadyQueue>,

    /// Idle worker sleep/wake
    parking: Box<dyn WorkerParking>,

    /// Which stack slots are in use
    slots: SlotAllocator,

    /// Memory backing every stack slot
    region: StackRegion,

    /// Cleared on shutdown; workers exit when they see it
    running: AtomicBool,

    /// Set while fresh tasks are deferred for lack of stacks
    exhausted: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler; reserves the stack region but starts no threads
    pub(crate) fn new(config: PoolConfig) -> SchedResult<Arc<Self>> {
        config.validate()?;

        let region = StackRegion::reserve(config.max_fibers, config.stack_size)?;

        Ok(Arc::new(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            queue: Box::new(SharedQueue::new(config.queue_order)),
            parking: new_parking(),
            slots: SlotAllocator::new(config.max_fibers),
            region,
            running: AtomicBool::new(true),
            exhausted: AtomicBool::new(false),
            config,
        }))
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn region(&self) -> &StackRegion {
        &self.region
    }

    /// Queue a fresh task for dispatch
    ///
    /// The returned claim lets a request waiting on this task start it on
    /// its own stack (see [`run_inline`]). If the pool has shut down the
    /// task is dropped without running.
    ///
    /// [`run_inline`]: crate::suspend::run_inline
    pub fn submit(&self, task: Task) -> TaskClaim {
        let claim = task.claim(self.id);
        match self.queue.push(ReadyEntry::Spawn(task)) {
            Ok(()) => self.parking.wake_one(),
            Err(entry) => {
                if let ReadyEntry::Spawn(task) = &entry {
                    kdebug!("pool {} shut down, dropping request {}", self.id, task.header().id());
                }
            }
        }
        claim
    }

    /// Queue a suspended fiber to continue
    pub(crate) fn resume(&self, fiber: FiberRef) {
        match self.queue.push(ReadyEntry::Resume(fiber)) {
            Ok(()) => self.parking.wake_one(),
            Err(entry) => {
                if let ReadyEntry::Resume(fiber) = &entry {
                    kdebug!("pool {} shut down, discarding request {}", self.id, fiber.request_id());
                }
            }
        }
    }

    /// Stop dispatching queued entries; running fibers carry on
    pub fn pause(&self) {
        self.queue.pause();
        kdebug!("pool {} paused", self.id);
    }

    /// Resume dispatching and wake every parked worker
    pub fn unpause(&self) {
        self.queue.unpause();
        self.parking.wake_all();
        kdebug!("pool {} unpaused", self.id);
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }

    /// Entries waiting to be dispatched or resumed
    #[inline]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Fibers holding a stack (dispatched, not yet finished)
    #[inline]
    pub fn live_fibers(&self) -> usize {
        self.slots.allocated_count() as usize
    }

    /// Most fibers ever alive at once
    #[inline]
    pub fn peak_fibers(&self) -> usize {
        self.slots.high_water_mark() as usize
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop workers and close the queue, returning what was still queued
    pub(crate) fn stop(&self) -> Vec<ReadyEntry> {
        self.running.store(false, Ordering::Release);
        let drained = self.queue.close();
        self.parking.wake_all();
        drained
    }

    /// Return a finished (or discarded) fiber's stack
    pub(crate) fn release_slot(&self, slot: SlotId) {
        if let Err(e) = self.region.deactivate_slot(slot) {
            kwarn!("releasing stack slot {}: {}", slot.as_u32(), e);
        }
        self.slots.release(slot);
        if self.exhausted.load(Ordering::Acquire) {
            self.parking.wake_one();
        }
    }

    fn next_entry(&self) -> Option<ReadyEntry> {
        let accept_fresh = self.live_fibers() < self.config.max_fibers;
        self.queue.pop(accept_fresh)
    }

    fn run_entry(self: &Arc<Self>, ctx: *mut SavedRegs, entry: ReadyEntry) {
        match entry {
            ReadyEntry::Spawn(task) => self.start_task(ctx, task),
            ReadyEntry::Resume(fiber) => self.run_fiber(ctx, fiber),
        }
    }

    /// Give a fresh task a stack and run it
    fn start_task(self: &Arc<Self>, ctx: *mut SavedRegs, task: Task) {
        // A waiter ran it inline; nothing left to dispatch
        if task.is_started() {
            return;
        }

        let alloc = match self.slots.allocate() {
            Ok(alloc) => alloc,
            Err(_) => return self.defer(task),
        };

        if alloc.fresh {
            if let Err(e) = self.region.activate_slot(alloc.id) {
                // The slot is never handed out again: its stack is not mapped
                kerror!(
                    "cannot map stack for request {}: {}; dropping it",
                    task.header().id(),
                    e
                );
                return;
            }
        }

        if self.exhausted.swap(false, Ordering::AcqRel) {
            kdebug!("pool {} has free stacks again", self.id);
        }

        let Some(body) = task.take_body() else {
            // Lost the race with a waiter after taking the slot
            self.release_slot(alloc.id);
            return;
        };

        let fiber = FiberRef::new(Arc::clone(task.header()), body, alloc.id, Arc::clone(self));
        self.run_fiber(ctx, fiber);
    }

    /// No stack available: put the task back until a fiber finishes
    fn defer(&self, task: Task) {
        if !self.exhausted.swap(true, Ordering::AcqRel) {
            kwarn!(
                "pool {}: all {} fiber stacks in use; deferring new requests",
                self.id,
                self.config.max_fibers
            );
        }
        if let Err(entry) = self.queue.requeue(ReadyEntry::Spawn(task)) {
            drop(entry);
        }
    }

    /// Switch into a fiber and act on why it came back
    fn run_fiber(&self, ctx: *mut SavedRegs, mut fiber: FiberRef) {
        let id = fiber.request_id();
        fiber.header().transition(RequestState::Running);

        if self.config.debug_logging {
            kdebug!("running request {}", id);
        }

        kprint::set_request_id(id.as_u64());
        let reason = unsafe { fiber.switch_in(ctx) };
        kprint::clear_request_id();

        match reason {
            SwitchReason::Yield => self.resume(fiber),
            SwitchReason::Suspend(register) => {
                fiber.header().transition(RequestState::Suspended);
                let wakeup = Wakeup::new(fiber);
                if panic::catch_unwind(AssertUnwindSafe(|| register(wakeup))).is_err() {
                    kerror!("suspend registration for request {} panicked", id);
                }
            }
            SwitchReason::Finished => {
                if self.config.debug_logging {
                    kdebug!("request {} finished", id);
                }
                drop(fiber);
            }
        }
    }
}

/// Main worker loop
pub(crate) fn worker_main_loop(scheduler: Arc<Scheduler>, worker_id: usize) {
    tls::set_worker_id(worker_id);
    kprint::set_worker_id(worker_id as u32);

    if scheduler.config.debug_logging {
        kdebug!("worker started (pool {})", scheduler.id);
    }

    // Context save area for switching into fibers. Boxed so its address
    // stays fixed while fibers hold a pointer to it.
    let mut ctx = Box::new(SavedRegs::default());
    let ctx_ptr: *mut SavedRegs = &mut *ctx;

    let spin_limit = scheduler.config.idle_spins;
    let park_timeout = scheduler.config.park_timeout;
    let mut idle_spins: u32 = 0;

    loop {
        if !scheduler.is_running() {
            break;
        }

        // Read before polling so a push in between cancels the park
        let epoch = scheduler.parking.epoch();

        match scheduler.next_entry() {
            Some(entry) => {
                idle_spins = 0;
                scheduler.run_entry(ctx_ptr, entry);
            }
            None => {
                if idle_spins < spin_limit {
                    idle_spins += 1;
                    for _ in 0..32 {
                        std::hint::spin_loop();
                    }
                    std::thread::yield_now();
                } else {
                    scheduler.parking.park(epoch, Some(park_timeout));
                    idle_spins = 0;
                }
            }
        }
    }

    if scheduler.config.debug_logging {
        kdebug!("worker exiting (pool {})", scheduler.id);
    }

    kprint::clear_worker_id();
    tls::clear_worker_id();
}
