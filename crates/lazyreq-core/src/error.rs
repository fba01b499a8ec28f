//! Error types for the request engine

use core::fmt;
use std::any::Any;
use std::sync::Arc;
use crate::id::RequestId;

/// Boxed error accepted from fallible request bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for runtime operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Fault recorded on a failed request
///
/// Cloning is cheap: the payload is shared, so every waiter and every
/// notify callback observes the same fault.
#[derive(Debug, Clone)]
pub enum RequestError {
    /// The request body panicked; holds the panic message
    Panicked(Arc<str>),

    /// A fallible body returned an error
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// `wait()` was called on the request that is currently executing,
    /// e.g. from one of its own notify callbacks. This can never complete.
    WaitOnSelf(RequestId),

    /// The request was dropped undispatched because its pool shut down
    Abandoned,
}

impl RequestError {
    /// Build a `Panicked` error from a `catch_unwind` payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message: Arc<str> = if let Some(s) = payload.downcast_ref::<&'static str>() {
            Arc::from(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Arc::from(s.as_str())
        } else {
            Arc::from("non-string panic payload")
        };
        RequestError::Panicked(message)
    }

    /// Wrap an error returned by a fallible body
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        RequestError::Failed(Arc::from(error.into()))
    }

    #[inline]
    pub fn is_panic(&self) -> bool {
        matches!(self, RequestError::Panicked(_))
    }

    #[inline]
    pub fn is_usage_fault(&self) -> bool {
        matches!(self, RequestError::WaitOnSelf(_))
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Panicked(msg) => write!(f, "request panicked: {}", msg),
            RequestError::Failed(e) => write!(f, "request failed: {}", e),
            RequestError::WaitOnSelf(id) => {
                write!(f, "request {} waited on itself and can never complete", id)
            }
            RequestError::Abandoned => write!(f, "request abandoned by a shut down pool"),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RequestError::Failed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Errors that can occur in runtime operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Operation requires a running fiber but was called outside one
    NotInFiber,

    /// No fiber stack slots available
    NoSlotsAvailable,

    /// Global pool already initialized
    AlreadyInitialized,

    /// Configuration rejected by validation
    Config(ConfigError),

    /// Memory allocation/mapping failed
    MemoryError(MemoryError),

    /// Failed to spawn a worker thread
    WorkerSpawnFailed,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::NotInFiber => write!(f, "not running inside a request"),
            SchedError::NoSlotsAvailable => write!(f, "no fiber stack slots available"),
            SchedError::AlreadyInitialized => write!(f, "pool already initialized"),
            SchedError::Config(e) => write!(f, "{}", e),
            SchedError::MemoryError(e) => write!(f, "memory error: {}", e),
            SchedError::WorkerSpawnFailed => write!(f, "failed to spawn worker thread"),
        }
    }
}

impl std::error::Error for SchedError {}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect failed
    ProtectionFailed,

    /// madvise failed
    AdviseFailed,

    /// Too many slots requested
    TooManySlots,

    /// Invalid slot ID
    InvalidSlot,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "memory allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
            MemoryError::AdviseFailed => write!(f, "memory advise failed"),
            MemoryError::TooManySlots => write!(f, "too many slots requested"),
            MemoryError::InvalidSlot => write!(f, "invalid slot ID"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        SchedError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = SchedError::NotInFiber;
        assert_eq!(format!("{}", e), "not running inside a request");

        let e = SchedError::MemoryError(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: memory allocation failed");

        let e = RequestError::WaitOnSelf(RequestId::from_raw(9));
        assert_eq!(
            format!("{}", e),
            "request 9 waited on itself and can never complete"
        );
    }

    #[test]
    fn test_sched_error_messages_distinct() {
        let all = [
            SchedError::NotInFiber,
            SchedError::NoSlotsAvailable,
            SchedError::AlreadyInitialized,
            SchedError::Config(ConfigError::InvalidValue("x")),
            SchedError::MemoryError(MemoryError::InvalidSlot),
            SchedError::WorkerSpawnFailed,
        ];
        let mut messages: Vec<String> = all.iter().map(ToString::to_string).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), all.len());
    }

    #[test]
    fn test_error_conversion() {
        let sched_err: SchedError = MemoryError::TooManySlots.into();
        assert!(matches!(sched_err, SchedError::MemoryError(MemoryError::TooManySlots)));

        let sched_err: SchedError = ConfigError::InvalidValue("x").into();
        assert!(matches!(sched_err, SchedError::Config(_)));
    }

    #[test]
    fn test_panic_payloads() {
        let e = RequestError::from_panic(Box::new("static message"));
        assert!(matches!(&e, RequestError::Panicked(m) if &**m == "static message"));

        let e = RequestError::from_panic(Box::new(String::from("owned")));
        assert!(matches!(&e, RequestError::Panicked(m) if &**m == "owned"));

        let e = RequestError::from_panic(Box::new(17u32));
        assert!(e.is_panic());
    }

    #[test]
    fn test_failed_keeps_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing chunk");
        let e = RequestError::failed(io);
        assert_eq!(format!("{}", e), "request failed: missing chunk");
        assert!(e.source().is_some());
        assert!(!e.is_usage_fault());
    }
}
