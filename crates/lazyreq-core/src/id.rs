//! Request and stack slot identifier types

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Source of fresh request ids. Zero is reserved for `RequestId::NONE`.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a request
///
/// Ids are handed out from a process-wide counter and are never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Sentinel value indicating no request
    pub const NONE: RequestId = RequestId(0);

    /// Allocate the next unused id
    #[inline]
    pub fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create an id from a raw value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        RequestId(raw)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<RequestId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "RequestId(NONE)")
        } else {
            write!(f, "RequestId({})", self.0)
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for RequestId {
    fn default() -> Self {
        RequestId::NONE
    }
}

/// Index of a fiber stack slot inside a pool's stack region
///
/// Unlike request ids, slot ids are recycled as soon as a fiber finishes.
/// The maximum value (u32::MAX) is reserved as a sentinel for "no slot".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotId(u32);

impl SlotId {
    /// Sentinel value indicating no slot
    pub const NONE: SlotId = SlotId(crate::constants::SLOT_NONE);

    /// Create a new SlotId from a raw value
    #[inline]
    pub const fn new(id: u32) -> Self {
        SlotId(id)
    }

    /// Get the raw u32 value
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Get as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "SlotId(NONE)")
        } else {
            write!(f, "SlotId({})", self.0)
        }
    }
}

impl Default for SlotId {
    fn default() -> Self {
        SlotId::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert!(!a.is_none());
    }

    #[test]
    fn test_request_id_none() {
        assert!(RequestId::NONE.is_none());
        assert_eq!(RequestId::NONE.to_option(), None);
        assert_eq!(RequestId::default(), RequestId::NONE);
        assert_eq!(format!("{}", RequestId::from_raw(7)), "7");
    }

    #[test]
    fn test_slot_id_basics() {
        let id = SlotId::new(42);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(id.as_usize(), 42);
        assert!(!id.is_none());
        assert!(SlotId::NONE.is_none());
    }
}
