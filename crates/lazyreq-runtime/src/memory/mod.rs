//! Stack region management for fiber slots
//!
//! Each pool reserves one contiguous virtual region carved into equal
//! slots. A slot is a guard page followed by the fiber's stack; stacks
//! grow down toward the guard, so an overflow faults instead of
//! corrupting the neighbouring slot.
//!
//! ```text
//! slot_base                                          slot_base + slot_size
//! | guard (PROT_NONE) |  stack (RW, grows down) <--- stack_top |
//! ```
//!
//! Platform-specific implementations handle the virtual memory calls.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
    } else {
        compile_error!("lazyreq-runtime requires a unix platform");
    }
}

use lazyreq_core::constants::{GUARD_SIZE, PAGE_SIZE};
use lazyreq_core::id::SlotId;

/// Round `size` up to a whole number of pages
#[inline]
pub const fn page_align(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Virtual memory holding every fiber stack of one pool
///
/// The mapping is released when the region is dropped. The scheduler
/// owns the region and outlives every fiber, so no stack is unmapped
/// while a fiber may still run on it.
pub struct StackRegion {
    /// Base address of the mapping
    base: *mut u8,

    /// Total size of the mapping
    total_size: usize,

    /// Guard page plus usable stack
    slot_size: usize,

    /// Usable stack per slot
    stack_size: usize,

    /// Number of slots
    max_slots: usize,
}

// The region is a raw mapping; callers coordinate access per slot
// through the slot allocator.
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

impl StackRegion {
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    #[inline]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Base address of a slot (start of its guard page)
    #[inline]
    pub fn slot_base(&self, slot: SlotId) -> *mut u8 {
        debug_assert!(slot.as_usize() < self.max_slots);
        unsafe { self.base.add(slot.as_usize() * self.slot_size) }
    }

    /// Lowest usable stack address of a slot
    #[inline]
    pub fn stack_bottom(&self, slot: SlotId) -> *mut u8 {
        unsafe { self.slot_base(slot).add(GUARD_SIZE) }
    }

    /// Initial stack pointer of a slot (stack grows down)
    #[inline]
    pub fn stack_top(&self, slot: SlotId) -> *mut u8 {
        unsafe { self.slot_base(slot).add(self.slot_size) }
    }

    /// Check whether `addr` falls inside the usable stack of `slot`
    #[inline]
    pub fn contains(&self, slot: SlotId, addr: *const u8) -> bool {
        let lo = self.stack_bottom(slot) as usize;
        let hi = self.stack_top(slot) as usize;
        (lo..hi).contains(&(addr as usize))
    }
}
