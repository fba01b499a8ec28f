//! Futex parking (Linux)
//!
//! The futex word *is* the wake epoch. A worker sleeps with `FUTEX_WAIT`
//! on the epoch it read before polling the queue, so the kernel refuses
//! to put it to sleep (EAGAIN) if any wake bumped the word in between.

use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use super::WorkerParking;

pub struct FutexParking {
    word: AtomicU32,
    /// Workers inside `park`; lets wakers skip the syscall
    sleepers: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
            sleepers: AtomicUsize::new(0),
        }
    }

    fn futex(&self, op: libc::c_int, val: u32, timeout: *const libc::timespec) -> libc::c_long {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word.as_ptr(),
                op | libc::FUTEX_PRIVATE_FLAG,
                val,
                timeout,
                ptr::null::<u32>(),
                0u32,
            )
        }
    }

    fn bump_and_wake(&self, waiters: u32) {
        // SeqCst pairs with the sleeper count in `park`: either the waker
        // sees the sleeper, or the sleeper sees the new epoch.
        self.word.fetch_add(1, Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            self.futex(libc::FUTEX_WAKE, waiters, ptr::null());
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn epoch(&self) -> u32 {
        self.word.load(Ordering::SeqCst)
    }

    fn park(&self, epoch: u32, timeout: Option<Duration>) -> bool {
        self.sleepers.fetch_add(1, Ordering::SeqCst);

        if self.word.load(Ordering::SeqCst) == epoch {
            let ts = timeout.map(|d| libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: d.subsec_nanos() as libc::c_long,
            });
            let ts_ptr = ts.as_ref().map_or(ptr::null(), |ts| ts as *const libc::timespec);
            // Return value ignored: timeout, EINTR and EAGAIN are all
            // answered by re-reading the word below.
            self.futex(libc::FUTEX_WAIT, epoch, ts_ptr);
        }

        self.sleepers.fetch_sub(1, Ordering::SeqCst);
        self.word.load(Ordering::SeqCst) != epoch
    }

    fn wake_one(&self) {
        self.bump_and_wake(1);
    }

    fn wake_all(&self) {
        self.bump_and_wake(i32::MAX as u32);
    }

    fn parked_count(&self) -> usize {
        self.sleepers.load(Ordering::Relaxed)
    }
}
