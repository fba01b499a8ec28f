//! # lazyreq-core
//!
//! Core types for the lazyreq request engine.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Fibers, stacks and worker threads live in `lazyreq-runtime`.
//!
//! ## Modules
//!
//! - `id` - Request and stack slot identifiers
//! - `state` - Request lifecycle state
//! - `header` - Shared per-request header (id + atomic state)
//! - `slot` - Slot allocator for fiber stacks
//! - `error` - Error types
//! - `spinlock` - Internal spinlock primitive
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - `LAZYREQ_*` environment overrides

pub mod id;
pub mod state;
pub mod header;
pub mod slot;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{RequestId, SlotId};
pub use state::RequestState;
pub use header::TaskHeader;
pub use slot::SlotAllocator;
pub use error::{BoxError, ConfigError, MemoryError, RequestError, SchedError, SchedResult};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_millis};

/// Constants for memory layout
pub mod constants {
    cfg_if::cfg_if! {
        if #[cfg(all(target_os = "macos", target_arch = "aarch64"))] {
            /// Page size (Apple Silicon uses 16 KB pages)
            pub const PAGE_SIZE: usize = 16 * 1024;
        } else {
            /// Page size
            pub const PAGE_SIZE: usize = 4096;
        }
    }

    /// Guard region below every fiber stack (one page)
    pub const GUARD_SIZE: usize = PAGE_SIZE;

    /// Default usable stack size per fiber (256 KB)
    pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

    /// Smallest stack a fiber may be configured with
    pub const MIN_STACK_SIZE: usize = 64 * 1024;

    /// Maximum workers (OS threads)
    pub const MAX_WORKERS: usize = 256;

    /// Default maximum number of live (dispatched, unfinished) fibers
    pub const DEFAULT_MAX_FIBERS: usize = 16384;

    /// No slot sentinel value
    pub const SLOT_NONE: u32 = u32::MAX;
}
