//! Per-request header shared between the runtime and the request handle
//!
//! The runtime moves a request between `Running` and `Suspended` as its
//! fiber is switched in and out; the request itself records the terminal
//! transition. Both sides go through [`TaskHeader::transition`], which
//! refuses to leave a terminal state.

use core::sync::atomic::{AtomicU8, Ordering};
use crate::id::RequestId;
use crate::state::RequestState;

/// Identity and lifecycle state of one request
#[derive(Debug)]
pub struct TaskHeader {
    id: RequestId,
    parent: RequestId,
    state: AtomicU8,
}

impl TaskHeader {
    /// Create a header in `Pending`
    pub fn new(id: RequestId, parent: RequestId) -> Self {
        Self {
            id,
            parent,
            state: AtomicU8::new(RequestState::Pending as u8),
        }
    }

    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Request that was running when this one was submitted, if any
    #[inline]
    pub fn parent(&self) -> RequestId {
        self.parent
    }

    #[inline]
    pub fn state(&self) -> RequestState {
        RequestState::from(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless the current state is terminal.
    ///
    /// Returns `false` (and leaves the state untouched) when the request
    /// already finished or failed.
    pub fn transition(&self, next: RequestState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if RequestState::from(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_starts_pending() {
        let header = TaskHeader::new(RequestId::next(), RequestId::NONE);
        assert_eq!(header.state(), RequestState::Pending);
        assert!(header.parent().is_none());
    }

    #[test]
    fn test_transitions_are_monotone() {
        let header = TaskHeader::new(RequestId::next(), RequestId::NONE);
        assert!(header.transition(RequestState::Running));
        assert!(header.transition(RequestState::Suspended));
        assert!(header.transition(RequestState::Running));
        assert!(header.transition(RequestState::Finished));

        // Terminal states are absorbing
        assert!(!header.transition(RequestState::Running));
        assert!(!header.transition(RequestState::Failed));
        assert_eq!(header.state(), RequestState::Finished);
    }
}
