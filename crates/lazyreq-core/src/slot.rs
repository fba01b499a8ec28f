//! Stack slot bookkeeping
//!
//! A pool maps one region of `max_slots` equal stack slots up front. A slot
//! is taken when a pending request is dispatched and given back when its
//! fiber finishes, so the number of taken slots is the number of live
//! fibers. Freed slots are reused last-in first-out: their pages are the
//! ones most likely to still be resident.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{SchedError, SchedResult};
use crate::id::SlotId;
use crate::spinlock::SpinLock;

/// A slot handed out by [`SlotAllocator::allocate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAllocation {
    pub id: SlotId,
    /// Never handed out before; its stack pages are not yet accessible
    pub fresh: bool,
}

struct Slots {
    /// Returned slots, most recent last
    recycled: Vec<SlotId>,
    /// Slots `0..untouched` have been handed out at least once
    untouched: u32,
    peak: u32,
}

pub struct SlotAllocator {
    slots: SpinLock<Slots>,
    /// Taken slots; mirrored outside the lock for the dispatch fast path
    live: AtomicU32,
    max_slots: u32,
}

impl SlotAllocator {
    pub fn new(max_slots: usize) -> Self {
        Self {
            slots: SpinLock::new(Slots {
                recycled: Vec::new(),
                untouched: 0,
                peak: 0,
            }),
            live: AtomicU32::new(0),
            max_slots: max_slots as u32,
        }
    }

    /// Take a slot, preferring the most recently returned one
    pub fn allocate(&self) -> SchedResult<SlotAllocation> {
        let mut slots = self.slots.lock();

        let allocation = if let Some(id) = slots.recycled.pop() {
            SlotAllocation { id, fresh: false }
        } else if slots.untouched < self.max_slots {
            let id = SlotId::new(slots.untouched);
            slots.untouched += 1;
            SlotAllocation { id, fresh: true }
        } else {
            return Err(SchedError::NoSlotsAvailable);
        };

        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        slots.peak = slots.peak.max(live);
        Ok(allocation)
    }

    /// Give a slot back; `SlotId::NONE` is ignored
    pub fn release(&self, id: SlotId) {
        if id.is_none() {
            return;
        }
        debug_assert!(self.is_valid(id));
        self.slots.lock().recycled.push(id);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    /// Slots currently taken
    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.live.load(Ordering::Acquire)
    }

    /// Most slots ever taken at once
    pub fn high_water_mark(&self) -> u32 {
        self.slots.lock().peak
    }

    #[inline]
    pub fn is_valid(&self, id: SlotId) -> bool {
        !id.is_none() && id.as_u32() < self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_slots_in_order() {
        let slots = SlotAllocator::new(8);
        let a = slots.allocate().unwrap();
        let b = slots.allocate().unwrap();

        assert_eq!(a, SlotAllocation { id: SlotId::new(0), fresh: true });
        assert_eq!(b, SlotAllocation { id: SlotId::new(1), fresh: true });
        assert_eq!(slots.allocated_count(), 2);
    }

    #[test]
    fn test_recycles_last_returned() {
        let slots = SlotAllocator::new(8);
        let a = slots.allocate().unwrap();
        let b = slots.allocate().unwrap();
        slots.release(a.id);
        slots.release(b.id);

        let c = slots.allocate().unwrap();
        assert_eq!(c, SlotAllocation { id: b.id, fresh: false });
        assert_eq!(slots.allocated_count(), 1);
        assert_eq!(slots.high_water_mark(), 2);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let slots = SlotAllocator::new(2);
        let _a = slots.allocate().unwrap();
        let b = slots.allocate().unwrap();
        assert_eq!(slots.allocate(), Err(SchedError::NoSlotsAvailable));

        slots.release(b.id);
        assert_eq!(slots.allocate().map(|s| s.id), Ok(b.id));

        slots.release(SlotId::NONE);
        assert_eq!(slots.allocated_count(), 2);
    }

    #[test]
    fn test_no_slot_handed_out_twice() {
        use std::sync::Arc;
        use std::thread;

        let slots = Arc::new(SlotAllocator::new(2048));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slots = Arc::clone(&slots);
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for round in 0..500 {
                        held.push(slots.allocate().unwrap().id);
                        if round % 3 == 0 {
                            slots.release(held.remove(0));
                        }
                    }
                    held.truncate(10);
                    held
                })
            })
            .collect();

        let mut all: Vec<SlotId> = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let before = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), before);
    }
}
