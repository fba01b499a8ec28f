//! Idle worker parking
//!
//! Linux sleeps on a futex; other platforms on a mutex and condvar.
//!
//! # Protocol
//!
//! Parking is epoch based so a wake can never slip in between "queue
//! looked empty" and "went to sleep":
//!
//! 1. Worker reads `epoch()`
//! 2. Worker polls the ready queue; if it finds work it never parks
//! 3. Worker calls `park(epoch, timeout)`, which returns immediately if
//!    any wake happened since step 1
//!
//! Every wake bumps the epoch before signalling.

use std::time::Duration;

/// Sleep/wake for idle workers
///
/// Wakers are submit, resume, unpause, slot release and shutdown.
pub trait WorkerParking: Send + Sync {
    /// Current wake epoch; read it before polling the queue
    fn epoch(&self) -> u32;

    /// Sleep until a wake newer than `epoch`, or until `timeout`
    ///
    /// True if a wake happened (possibly before the call). The caller
    /// polls the queue again either way.
    fn park(&self, epoch: u32, timeout: Option<Duration>) -> bool;

    fn wake_one(&self);

    fn wake_all(&self);

    /// Workers currently inside `park` (racy; for tests and diagnostics)
    fn parked_count(&self) -> usize;
}

mod fallback;
pub use fallback::FallbackParking;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        pub use fallback::FallbackParking as PlatformParking;
    }
}

pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn both() -> Vec<Arc<dyn WorkerParking>> {
        let platform: Arc<dyn WorkerParking> = Arc::new(PlatformParking::new());
        let fallback: Arc<dyn WorkerParking> = Arc::new(FallbackParking::new());
        vec![platform, fallback]
    }

    fn wait_for_sleepers(parking: &Arc<dyn WorkerParking>, n: usize) {
        while parking.parked_count() < n {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_park_times_out() {
        for parking in both() {
            let epoch = parking.epoch();
            let start = Instant::now();
            assert!(!parking.park(epoch, Some(Duration::from_millis(50))));
            assert!(start.elapsed() >= Duration::from_millis(40));
        }
    }

    #[test]
    fn test_wake_before_park_is_not_lost() {
        for parking in both() {
            let epoch = parking.epoch();
            parking.wake_one();

            let start = Instant::now();
            assert!(parking.park(epoch, Some(Duration::from_secs(10))));
            assert!(start.elapsed() < Duration::from_secs(5));
            assert_ne!(parking.epoch(), epoch);
        }
    }

    #[test]
    fn test_wake_one_sleeper() {
        for parking in both() {
            let sleeper = Arc::clone(&parking);
            let handle = thread::spawn(move || {
                let epoch = sleeper.epoch();
                sleeper.park(epoch, Some(Duration::from_secs(10)))
            });

            wait_for_sleepers(&parking, 1);
            parking.wake_one();
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_wake_all_sleepers() {
        for parking in both() {
            let epoch = parking.epoch();
            let handles: Vec<_> = (0..3)
                .map(|_| {
                    let sleeper = Arc::clone(&parking);
                    thread::spawn(move || sleeper.park(epoch, Some(Duration::from_secs(10))))
                })
                .collect();

            wait_for_sleepers(&parking, 3);
            parking.wake_all();
            for h in handles {
                assert!(h.join().unwrap());
            }
            assert_eq!(parking.parked_count(), 0);
        }
    }
}
