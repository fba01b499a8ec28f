//! Waiting on one or many requests
//!
//! Inside a pool a waiter first runs, on its own stack, every request it
//! waits on that is still queued in the same pool. It then parks its fiber
//! once on a [`SuspendRecord`] shared by the rest; the last of them to
//! complete wakes it. A parked waiter thus only ever waits on requests
//! that already hold a stack, and a pool with every stack taken by waiters
//! still drains.
//!
//! Outside a pool the thread blocks on each request's condvar in turn.

use std::sync::Arc;

use lazyreq_core::RequestError;
use lazyreq_runtime::{in_fiber, suspend_current, yield_now, Inline, SuspendRecord};

use crate::request::Request;

pub(crate) trait Waitable {
    /// Run the request on the caller's stack if it is still queued here
    fn start_here(&self) -> Inline;

    /// Register `record` to be told when this completes
    ///
    /// Returns false, leaving `record` alone, if it already has.
    fn add_waiter(&self, record: &Arc<SuspendRecord>) -> bool;

    /// Block the calling OS thread until terminal
    fn block_until_terminal(&self);
}

/// Return once every target is terminal
pub(crate) fn wait_for(targets: &[&dyn Waitable]) {
    if targets.is_empty() {
        return;
    }

    if !in_fiber() {
        block_on_all(targets);
        return;
    }

    // Queued targets in a paused pool stay queued; step aside until the
    // pool resumes, then start them
    while start_queued(targets) {
        yield_now();
    }

    let record = SuspendRecord::new(targets.len());
    for target in targets {
        if !target.add_waiter(&record) {
            record.child_done();
        }
    }
    if record.remaining() == 0 {
        return;
    }

    let armed = Arc::clone(&record);
    if suspend_current(move |wakeup| armed.arm(wakeup)).is_err() {
        block_on_all(targets);
    }
}

/// Start every still-queued target; true if a paused pool held one back
fn start_queued(targets: &[&dyn Waitable]) -> bool {
    let mut held = false;
    for target in targets {
        if target.start_here() == Inline::Held {
            held = true;
        }
    }
    held
}

fn block_on_all(targets: &[&dyn Waitable]) {
    for target in targets {
        target.block_until_terminal();
    }
}

/// Wait for every request in `requests`, suspending at most once
///
/// Outcomes are returned in the same order as `requests`. A request that is
/// the caller itself yields `WaitOnSelf` and is not waited on.
pub fn wait_all<T>(requests: &[Request<T>]) -> Vec<Result<T, RequestError>>
where
    T: Clone + Send + Sync + 'static,
{
    let pending: Vec<&dyn Waitable> = requests
        .iter()
        .filter(|r| !r.is_self_wait() && !r.is_terminal())
        .map(|r| r.as_waitable())
        .collect();

    wait_for(&pending);

    requests
        .iter()
        .map(|r| {
            if r.is_self_wait() {
                Err(RequestError::WaitOnSelf(r.id()))
            } else {
                r.outcome()
            }
        })
        .collect()
}
