//! Condvar parking for platforms without futexes
//!
//! Same epoch protocol as the futex version, with the epoch kept under the
//! mutex the condvar waits on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::WorkerParking;

pub struct FallbackParking {
    epoch: Mutex<u32>,
    bell: Condvar,
    sleepers: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            bell: Condvar::new(),
            sleepers: AtomicUsize::new(0),
        }
    }

    // The guarded value is a plain counter, valid even after a panic
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.epoch.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        let mut epoch = self.lock();
        *epoch = epoch.wrapping_add(1);
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn epoch(&self) -> u32 {
        *self.lock()
    }

    fn park(&self, epoch: u32, timeout: Option<Duration>) -> bool {
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut current = self.lock();
        while *current == epoch {
            current = match deadline {
                None => self.bell.wait(current).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                        break;
                    };
                    match self.bell.wait_timeout(current, left) {
                        Ok((guard, _)) => guard,
                        Err(e) => e.into_inner().0,
                    }
                }
            };
        }
        let woken = *current != epoch;
        drop(current);

        self.sleepers.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        self.bump();
        self.bell.notify_one();
    }

    fn wake_all(&self) {
        self.bump();
        self.bell.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.sleepers.load(Ordering::Relaxed)
    }
}
