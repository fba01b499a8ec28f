//! Thread-local storage for fiber context
//!
//! Provides access to the current worker index and the fiber running on it.
//!
//! Fibers migrate between worker threads, so a thread-local address
//! computed before a context switch may belong to another thread after
//! it. The accessors are `#[inline(never)]` to force the address to be
//! recomputed on every call.

use crate::fiber::Fiber;
use std::cell::Cell;
use std::ptr;

thread_local! {
    /// Current worker index for this OS thread
    static WORKER_ID: Cell<usize> = const { Cell::new(usize::MAX) };

    /// Fiber currently switched in on this worker
    static CURRENT_FIBER: Cell<*mut Fiber> = const { Cell::new(ptr::null_mut()) };
}

/// Set the current worker index
#[inline(never)]
pub fn set_worker_id(id: usize) {
    WORKER_ID.with(|cell| cell.set(id));
}

#[inline(never)]
pub fn clear_worker_id() {
    WORKER_ID.with(|cell| cell.set(usize::MAX));
}

/// Current worker index, `None` if not on a worker thread
#[inline(never)]
pub fn worker_id() -> Option<usize> {
    let id = WORKER_ID.with(|cell| cell.get());
    if id == usize::MAX {
        None
    } else {
        Some(id)
    }
}

#[inline(never)]
pub(crate) fn set_current_fiber(fiber: *mut Fiber) {
    CURRENT_FIBER.with(|cell| cell.set(fiber));
}

/// Clear the current fiber (worker back on its own stack)
#[inline(never)]
pub(crate) fn clear_current_fiber() {
    CURRENT_FIBER.with(|cell| cell.set(ptr::null_mut()));
}

#[inline(never)]
pub(crate) fn current_fiber() -> *mut Fiber {
    CURRENT_FIBER.with(|cell| cell.get())
}

/// Check if we're running inside a fiber
#[inline]
pub fn in_fiber() -> bool {
    !current_fiber().is_null()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_roundtrip() {
        assert_eq!(worker_id(), None);
        set_worker_id(7);
        assert_eq!(worker_id(), Some(7));
        clear_worker_id();
        assert_eq!(worker_id(), None);
    }

    #[test]
    fn test_not_in_fiber_on_plain_thread() {
        assert!(!in_fiber());
    }
}
