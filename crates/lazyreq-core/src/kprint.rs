//! Kernel-style logging to stderr
//!
//! printk-like macros that write whole lines under the stderr lock, so
//! output from concurrent workers never interleaves mid-line. Leveled lines
//! carry the worker index and, inside a request, the request id:
//!
//! ```text
//! [WARN ] [w2] [r1734] stack slot 17 still mapped
//! ```
//!
//! The level check happens before the arguments are formatted.
//!
//! # Environment Variables
//!
//! - `LAZYREQ_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace (or 0-5); default info
//! - `LAZYREQ_FLUSH_EPRINT=1` - Flush stderr after each line (useful when chasing crashes)
//!
//! # Usage
//!
//! ```ignore
//! use lazyreq_core::{kdebug, kerror, kinfo, kwarn};
//!
//! kinfo!("pool {} up", id);
//! kdebug!("request {} suspended on {} children", req, n);
//! kwarn!("deferring new requests");
//! kerror!("callback panicked: {}", msg);
//! ```

use std::cell::Cell;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

/// Verbosity, least to most
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Accepts a level name (any case) or its number
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<usize>() {
            return Self::ALL.get(n).copied();
        }
        Self::ALL
            .iter()
            .copied()
            .find(|level| level.name().eq_ignore_ascii_case(s))
    }

    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn tag(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN ]",
            LogLevel::Info => "[INFO ]",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }

    fn from_raw(raw: u8) -> Self {
        Self::ALL.get(raw as usize).copied().unwrap_or(LogLevel::Trace)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static ENV_LOADED: Once = Once::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);

thread_local! {
    static WORKER: Cell<Option<u32>> = const { Cell::new(None) };
    static REQUEST: Cell<u64> = const { Cell::new(0) };
}

/// Load `LAZYREQ_LOG_LEVEL` / `LAZYREQ_FLUSH_EPRINT`
///
/// Runs at most once, on the first log call if not earlier. Settings made
/// with [`set_log_level`] / [`set_flush_enabled`] win over the environment.
pub fn init() {
    ENV_LOADED.call_once(|| {
        if let Some(level) = std::env::var("LAZYREQ_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
        if let Ok(v) = std::env::var("LAZYREQ_FLUSH_EPRINT") {
            let on = matches!(v.trim(), "1" | "true" | "yes" | "on");
            FLUSH.store(on, Ordering::Relaxed);
        }
    });
}

pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_raw(LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH.store(enabled, Ordering::Relaxed);
}

/// Would a line at `level` be written?
#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

/// Tag this thread's log lines with a worker index
pub fn set_worker_id(id: u32) {
    WORKER.with(|w| w.set(Some(id)));
}

pub fn clear_worker_id() {
    WORKER.with(|w| w.set(None));
}

/// Tag this thread's log lines with the request switched in on it
pub fn set_request_id(id: u64) {
    REQUEST.with(|r| r.set(id));
}

pub fn clear_request_id() {
    REQUEST.with(|r| r.set(0));
}

// Not inlined: a fiber that logs, suspends and resumes elsewhere must
// read the new thread's slots, not a cached address.
#[inline(never)]
fn write_context(out: &mut impl Write) {
    if let Some(worker) = WORKER.with(|w| w.get()) {
        let _ = write!(out, "[w{}] ", worker);
    }
    let request = REQUEST.with(|r| r.get());
    if request != 0 {
        let _ = write!(out, "[r{}] ", request);
    }
}

/// Write one line; `None` for an untagged `kprintln!`
#[doc(hidden)]
pub fn _emit(level: Option<LogLevel>, args: fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    if let Some(level) = level {
        let _ = write!(out, "{} ", level.tag());
        write_context(&mut out);
    }
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

/// Print a line to stderr, untagged and unfiltered
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint::_emit(None, format_args!(""))
    };
    ($($arg:tt)*) => {
        $crate::kprint::_emit(None, format_args!($($arg)*))
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {
        if $crate::kprint::enabled($crate::kprint::LogLevel::$level) {
            $crate::kprint::_emit(
                Some($crate::kprint::LogLevel::$level),
                format_args!($($arg)*),
            );
        }
    };
}

/// Error level log (shown unless logging is off)
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) };
}

/// Trace level log (per-switch detail)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::__klog!(Trace, $($arg)*) };
}
