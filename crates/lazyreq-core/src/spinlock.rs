//! Spinlock for very short scheduler critical sections
//!
//! Guards the slot free list and the wakeup held by a suspension record.
//! Both are touched from fiber stacks and from worker scheduler stacks,
//! and are held for a handful of instructions. Never hold one across a
//! context switch.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Busy-wait rounds before a contender starts yielding its thread
const SPINS_BEFORE_YIELD: u32 = 100;

/// Test-and-test-and-set lock
///
/// Request bodies should use `std::sync::Mutex` for their own data.
pub struct SpinLock<T> {
    held: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: the lock hands out at most one guard at a time
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock
    ///
    /// Spins briefly, then yields between attempts: the holder may be a
    /// worker thread the OS has descheduled.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut rounds = 0u32;
        while self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.held.load(Ordering::Relaxed) {
                if rounds < SPINS_BEFORE_YIELD {
                    rounds += 1;
                    core::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
        }
        SpinLockGuard { lock: self }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// Releases the lock on drop
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: the guard proves exclusive access
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves exclusive access
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_guard_releases() {
        let lock = SpinLock::new(Vec::new());
        lock.lock().push(1u32);
        lock.lock().push(2);
        assert_eq!(lock.into_inner(), vec![1, 2]);
    }

    #[test]
    fn test_take_under_lock() {
        let lock = SpinLock::new(Some(5u8));
        assert_eq!(lock.lock().take(), Some(5));
        assert_eq!(lock.lock().take(), None);
    }

    #[test]
    fn test_contended_counter() {
        let lock = Arc::new(SpinLock::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..5000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 20_000);
    }
}
