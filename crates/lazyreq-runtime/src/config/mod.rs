//! Pool configuration
//!
//! Provides library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls on the returned config
//! 2. Environment variables (runtime)
//! 3. Library defaults (`defaults.rs`)
//!
//! # Example
//!
//! ```rust,ignore
//! use lazyreq_runtime::config::{PoolConfig, QueueOrder};
//!
//! // Use defaults with env overrides
//! let config = PoolConfig::from_env();
//!
//! // Or customize programmatically
//! let config = PoolConfig::from_env()
//!     .num_workers(8)
//!     .queue_order(QueueOrder::Lifo);
//! ```

pub mod defaults;

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use lazyreq_core::constants::{MAX_WORKERS, MIN_STACK_SIZE};
use lazyreq_core::env::{env_get, env_get_bool, env_get_millis};
use lazyreq_core::error::ConfigError;
use lazyreq_core::kprintln;

/// Order in which ready entries of the same kind are taken off the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueOrder {
    /// Oldest entry first (breadth-first over a request tree)
    #[default]
    Fifo,
    /// Newest entry first (depth-first; keeps fewer fibers alive)
    Lifo,
}

impl FromStr for QueueOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(QueueOrder::Fifo),
            "lifo" => Ok(QueueOrder::Lifo),
            _ => Err(ConfigError::InvalidValue("queue_order must be fifo or lifo")),
        }
    }
}

impl fmt::Display for QueueOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueOrder::Fifo => write!(f, "fifo"),
            QueueOrder::Lifo => write!(f, "lifo"),
        }
    }
}

/// Worker pool configuration with builder pattern.
///
/// Use `from_env()` to start with library defaults and apply
/// any environment variable overrides.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Maximum dispatched-but-unfinished requests (one stack each)
    pub max_fibers: usize,
    /// Usable stack size per fiber, rounded up to whole pages
    pub stack_size: usize,
    /// Dispatch order within the ready queue
    pub queue_order: QueueOrder,
    /// Spins before parking an idle worker
    pub idle_spins: u32,
    /// Upper bound on a single park
    pub park_timeout: Duration,
    /// Enable per-dispatch debug logging
    pub debug_logging: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `LAZYREQ_NUM_WORKERS` - Number of worker threads
    /// - `LAZYREQ_MAX_FIBERS` - Max live fibers per pool
    /// - `LAZYREQ_STACK_SIZE` - Stack size per fiber in bytes
    /// - `LAZYREQ_QUEUE_ORDER` - `fifo` or `lifo`
    /// - `LAZYREQ_IDLE_SPINS` - Spins before parking
    /// - `LAZYREQ_PARK_TIMEOUT_MS` - Park timeout in milliseconds
    /// - `LAZYREQ_DEBUG` - Enable debug logging (0/1)
    ///
    /// Values that fail to parse are logged and fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Self {
            num_workers: env_get("LAZYREQ_NUM_WORKERS", defaults.num_workers),
            max_fibers: env_get("LAZYREQ_MAX_FIBERS", defaults.max_fibers),
            stack_size: env_get("LAZYREQ_STACK_SIZE", defaults.stack_size),
            queue_order: env_get("LAZYREQ_QUEUE_ORDER", defaults.queue_order),
            idle_spins: env_get("LAZYREQ_IDLE_SPINS", defaults.idle_spins),
            park_timeout: env_get_millis("LAZYREQ_PARK_TIMEOUT_MS", defaults::PARK_TIMEOUT_MS),
            debug_logging: env_get_bool("LAZYREQ_DEBUG", defaults.debug_logging),
        }
    }

    /// Create config with library defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            num_workers: defaults::num_workers(),
            max_fibers: defaults::MAX_FIBERS,
            stack_size: defaults::STACK_SIZE,
            queue_order: defaults::QUEUE_ORDER.parse().unwrap_or_default(),
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn max_fibers(mut self, n: usize) -> Self {
        self.max_fibers = n;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn queue_order(mut self, order: QueueOrder) -> Self {
        self.queue_order = order;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers must be > 0"));
        }
        if self.num_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidValue("num_workers must be <= 256"));
        }
        if self.max_fibers == 0 {
            return Err(ConfigError::InvalidValue("max_fibers must be > 0"));
        }
        if self.max_fibers > defaults::MAX_FIBERS_LIMIT {
            return Err(ConfigError::InvalidValue("max_fibers must be <= 1048576"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size must be >= 64KB"));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        kprintln!("lazyreq pool configuration:");
        kprintln!("  num_workers:    {}", self.num_workers);
        kprintln!("  max_fibers:     {}", self.max_fibers);
        kprintln!("  stack_size:     {}", self.stack_size);
        kprintln!("  queue_order:    {}", self.queue_order);
        kprintln!("  idle_spins:     {}", self.idle_spins);
        kprintln!("  park_timeout:   {:?}", self.park_timeout);
        kprintln!("  debug_logging:  {}", self.debug_logging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        let config = PoolConfig::from_env();
        assert!(config.num_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new()
            .num_workers(8)
            .max_fibers(512)
            .queue_order(QueueOrder::Lifo)
            .park_timeout(Duration::from_millis(5));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.max_fibers, 512);
        assert_eq!(config.queue_order, QueueOrder::Lifo);
        assert_eq!(config.park_timeout, Duration::from_millis(5));
    }

    #[test]
    fn test_validation() {
        assert!(PoolConfig::new().num_workers(0).validate().is_err());
        assert!(PoolConfig::new().num_workers(1000).validate().is_err());
        assert!(PoolConfig::new().max_fibers(0).validate().is_err());
        assert!(PoolConfig::new().stack_size(4096).validate().is_err());
        assert!(PoolConfig::new().park_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_queue_order_parse() {
        assert_eq!("fifo".parse::<QueueOrder>(), Ok(QueueOrder::Fifo));
        assert_eq!(" LIFO ".parse::<QueueOrder>(), Ok(QueueOrder::Lifo));
        assert!("random".parse::<QueueOrder>().is_err());
        assert_eq!(QueueOrder::Lifo.to_string(), "lifo");
    }
}
