//! Request lifecycle state

use core::fmt;

/// State of a request
///
/// ```text
/// Pending -> Running -> Finished | Failed
///               ^  |
///               |  v
///            Suspended
/// ```
///
/// `Finished` and `Failed` are terminal: no transition ever leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    /// Submitted, sitting in the ready queue, not yet dispatched
    Pending = 0,

    /// Currently executing on a worker
    Running = 1,

    /// Parked in `wait()` until its children are terminal
    Suspended = 2,

    /// Completed with a result
    Finished = 3,

    /// Completed with a fault
    Failed = 4,
}

impl RequestState {
    /// Check if this state is terminal (finished or failed)
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Finished | RequestState::Failed)
    }

    /// Check if the request has been dispatched but not completed
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, RequestState::Running | RequestState::Suspended)
    }
}

impl From<u8> for RequestState {
    fn from(v: u8) -> Self {
        match v {
            0 => RequestState::Pending,
            1 => RequestState::Running,
            2 => RequestState::Suspended,
            3 => RequestState::Finished,
            4 => RequestState::Failed,
            _ => RequestState::Pending, // Default for invalid values
        }
    }
}

impl From<RequestState> for u8 {
    fn from(state: RequestState) -> u8 {
        state as u8
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Pending => write!(f, "pending"),
            RequestState::Running => write!(f, "running"),
            RequestState::Suspended => write!(f, "suspended"),
            RequestState::Finished => write!(f, "finished"),
            RequestState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(RequestState::Finished.is_terminal());
        assert!(RequestState::Failed.is_terminal());
        assert!(!RequestState::Pending.is_terminal());
        assert!(!RequestState::Running.is_terminal());
        assert!(!RequestState::Suspended.is_terminal());

        assert!(RequestState::Running.is_active());
        assert!(RequestState::Suspended.is_active());
        assert!(!RequestState::Pending.is_active());
    }

    #[test]
    fn test_u8_conversion() {
        for state in [
            RequestState::Pending,
            RequestState::Running,
            RequestState::Suspended,
            RequestState::Finished,
            RequestState::Failed,
        ] {
            assert_eq!(RequestState::from(u8::from(state)), state);
        }
        assert_eq!(RequestState::from(200), RequestState::Pending);
    }
}
