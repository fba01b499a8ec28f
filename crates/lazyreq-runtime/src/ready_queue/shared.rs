//! Shared ready queue
//!
//! Design:
//! - One `Mutex` guarding two lanes (resumed fibers, fresh tasks) and the
//!   pause/closed flags, so pause takes effect atomically with respect to
//!   every pop
//! - Resumed fibers are dispatched before fresh tasks: finishing started
//!   work releases stacks, starting new work consumes them
//! - FIFO or LIFO within each lane

use super::{ReadyEntry, ReadyQueue};
use crate::config::QueueOrder;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// The two lanes of the queue plus control flags
struct Lanes<T> {
    resumed: VecDeque<T>,
    fresh: VecDeque<T>,
    paused: bool,
    closed: bool,
}

impl<T> Lanes<T> {
    fn new() -> Self {
        Self {
            resumed: VecDeque::new(),
            fresh: VecDeque::new(),
            paused: false,
            closed: false,
        }
    }

    fn lane(&mut self, resumed: bool) -> &mut VecDeque<T> {
        if resumed {
            &mut self.resumed
        } else {
            &mut self.fresh
        }
    }

    fn push(&mut self, item: T, resumed: bool) {
        self.lane(resumed).push_back(item);
    }

    /// Undo a pop: the item becomes the next one taken in `order`
    fn requeue(&mut self, item: T, resumed: bool, order: QueueOrder) {
        match order {
            QueueOrder::Fifo => self.lane(resumed).push_front(item),
            QueueOrder::Lifo => self.lane(resumed).push_back(item),
        }
    }

    fn pop(&mut self, accept_fresh: bool, order: QueueOrder) -> Option<T> {
        if self.paused {
            return None;
        }
        let take = |lane: &mut VecDeque<T>| match order {
            QueueOrder::Fifo => lane.pop_front(),
            QueueOrder::Lifo => lane.pop_back(),
        };
        if let Some(item) = take(&mut self.resumed) {
            return Some(item);
        }
        if accept_fresh {
            return take(&mut self.fresh);
        }
        None
    }

    fn len(&self) -> usize {
        self.resumed.len() + self.fresh.len()
    }

    fn drain(&mut self) -> Vec<T> {
        self.resumed.drain(..).chain(self.fresh.drain(..)).collect()
    }
}

/// Ready queue shared by all workers of a pool
pub struct SharedQueue {
    lanes: Mutex<Lanes<ReadyEntry>>,
    order: QueueOrder,
    /// Mirrors of the guarded state for lock-free diagnostics
    len: AtomicUsize,
    paused: AtomicBool,
}

impl SharedQueue {
    pub fn new(order: QueueOrder) -> Self {
        Self {
            lanes: Mutex::new(Lanes::new()),
            order,
            len: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn order(&self) -> QueueOrder {
        self.order
    }
}

impl ReadyQueue for SharedQueue {
    fn push(&self, entry: ReadyEntry) -> Result<(), ReadyEntry> {
        let mut lanes = self.lanes.lock().unwrap();
        if lanes.closed {
            return Err(entry);
        }
        let resumed = entry.is_resume();
        lanes.push(entry, resumed);
        self.len.store(lanes.len(), Ordering::Release);
        Ok(())
    }

    fn requeue(&self, entry: ReadyEntry) -> Result<(), ReadyEntry> {
        let mut lanes = self.lanes.lock().unwrap();
        if lanes.closed {
            return Err(entry);
        }
        let resumed = entry.is_resume();
        lanes.requeue(entry, resumed, self.order);
        self.len.store(lanes.len(), Ordering::Release);
        Ok(())
    }

    fn pop(&self, accept_fresh: bool) -> Option<ReadyEntry> {
        if self.len.load(Ordering::Acquire) == 0 || self.paused.load(Ordering::Acquire) {
            return None;
        }
        let mut lanes = self.lanes.lock().unwrap();
        let entry = lanes.pop(accept_fresh, self.order);
        self.len.store(lanes.len(), Ordering::Release);
        entry
    }

    fn pause(&self) {
        let mut lanes = self.lanes.lock().unwrap();
        lanes.paused = true;
        self.paused.store(true, Ordering::Release);
    }

    fn unpause(&self) {
        let mut lanes = self.lanes.lock().unwrap();
        lanes.paused = false;
        self.paused.store(false, Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn close(&self) -> Vec<ReadyEntry> {
        let mut lanes = self.lanes.lock().unwrap();
        lanes.closed = true;
        let drained = lanes.drain();
        self.len.store(0, Ordering::Release);
        drained
    }

    fn is_closed(&self) -> bool {
        self.lanes.lock().unwrap().closed
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ready_queue::Task;
    use lazyreq_core::header::TaskHeader;
    use lazyreq_core::id::RequestId;
    use std::sync::Arc;

    fn task(id: u64) -> ReadyEntry {
        let header = Arc::new(TaskHeader::new(RequestId::from_raw(id), RequestId::NONE));
        ReadyEntry::Spawn(Task::new(header, Box::new(|| {})))
    }

    fn id_of(entry: Option<ReadyEntry>) -> Option<u64> {
        match entry {
            Some(ReadyEntry::Spawn(t)) => Some(t.header().id().as_u64()),
            Some(ReadyEntry::Resume(_)) => panic!("unexpected resume entry"),
            None => None,
        }
    }

    #[test]
    fn test_lanes_prefer_resumed() {
        let mut lanes = Lanes::new();
        lanes.push(1, false);
        lanes.push(2, false);
        lanes.push(10, true);

        assert_eq!(lanes.pop(true, QueueOrder::Fifo), Some(10));
        assert_eq!(lanes.pop(false, QueueOrder::Fifo), None);
        assert_eq!(lanes.pop(true, QueueOrder::Fifo), Some(1));
        assert_eq!(lanes.len(), 1);
    }

    #[test]
    fn test_lanes_requeue_is_next() {
        for order in [QueueOrder::Fifo, QueueOrder::Lifo] {
            let mut lanes = Lanes::new();
            lanes.push(1, false);
            lanes.push(2, false);
            lanes.push(3, false);

            let first = lanes.pop(true, order).unwrap();
            lanes.requeue(first, false, order);
            assert_eq!(lanes.pop(true, order), Some(first));
        }
    }

    #[test]
    fn test_fifo_order() {
        let q = SharedQueue::new(QueueOrder::Fifo);
        for i in 1..=3 {
            assert!(q.push(task(i)).is_ok());
        }
        assert_eq!(q.len(), 3);
        assert_eq!(id_of(q.pop(true)), Some(1));
        assert_eq!(id_of(q.pop(true)), Some(2));
        assert_eq!(id_of(q.pop(true)), Some(3));
        assert!(q.pop(true).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_lifo_order() {
        let q = SharedQueue::new(QueueOrder::Lifo);
        for i in 1..=3 {
            assert!(q.push(task(i)).is_ok());
        }
        assert_eq!(id_of(q.pop(true)), Some(3));
        assert_eq!(id_of(q.pop(true)), Some(2));
    }

    #[test]
    fn test_pause_blocks_pop_not_push() {
        let q = SharedQueue::new(QueueOrder::Fifo);
        q.pause();
        q.pause(); // idempotent
        assert!(q.is_paused());
        assert!(q.push(task(1)).is_ok());
        assert!(q.pop(true).is_none());
        assert_eq!(q.len(), 1);

        q.unpause();
        assert!(!q.is_paused());
        assert_eq!(id_of(q.pop(true)), Some(1));
    }

    #[test]
    fn test_close_drains_and_rejects() {
        let q = SharedQueue::new(QueueOrder::Fifo);
        assert!(q.push(task(1)).is_ok());
        assert!(q.push(task(2)).is_ok());

        let drained = q.close();
        assert_eq!(drained.len(), 2);
        assert!(q.is_closed());
        assert!(q.is_empty());
        assert!(q.push(task(3)).is_err());
        assert!(q.requeue(task(4)).is_err());
    }
}
