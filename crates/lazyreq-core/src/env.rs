//! Environment overrides for pool configuration
//!
//! Every `LAZYREQ_*` knob goes through these helpers. An unset or empty
//! variable means "use the default"; a value that does not parse is
//! reported once with `kwarn!` and also falls back to the default, so a
//! typo never takes a pool down.
//!
//! ```ignore
//! use lazyreq_core::env::{env_get, env_get_bool, env_get_millis};
//!
//! let workers: usize = env_get("LAZYREQ_NUM_WORKERS", 4);
//! let park = env_get_millis("LAZYREQ_PARK_TIMEOUT_MS", 10);
//! let debug = env_get_bool("LAZYREQ_DEBUG", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

use crate::kwarn;

/// Raw value of `key`, trimmed; `None` when unset or blank
pub fn env_var(key: &str) -> Option<String> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse `key` as `T`, or return `default`
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    let Some(raw) = env_var(key) else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            kwarn!("ignoring {}={:?}: not a valid value", key, raw);
            default
        }
    }
}

/// Read `key` as a switch
///
/// `1/true/yes/on` and `0/false/no/off` (any case) are understood.
pub fn env_get_bool(key: &str, default: bool) -> bool {
    let Some(raw) = env_var(key) else {
        return default;
    };
    match parse_switch(&raw) {
        Some(value) => value,
        None => {
            kwarn!("ignoring {}={:?}: expected on/off", key, raw);
            default
        }
    }
}

/// Read `key` as a whole number of milliseconds
pub fn env_get_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns its variable names; tests run in parallel.

    #[test]
    fn test_unset_uses_default() {
        assert_eq!(env_get("__LAZYREQ_TEST_UNSET__", 42usize), 42);
        assert!(env_get_bool("__LAZYREQ_TEST_UNSET__", true));
        assert_eq!(
            env_get_millis("__LAZYREQ_TEST_UNSET__", 7),
            Duration::from_millis(7)
        );
        assert!(env_var("__LAZYREQ_TEST_UNSET__").is_none());
    }

    #[test]
    fn test_parse_and_fallback() {
        std::env::set_var("__LAZYREQ_TEST_NUM__", " 123 ");
        assert_eq!(env_get("__LAZYREQ_TEST_NUM__", 0u32), 123);

        std::env::set_var("__LAZYREQ_TEST_BAD__", "lots");
        assert_eq!(env_get("__LAZYREQ_TEST_BAD__", 8u32), 8);

        std::env::set_var("__LAZYREQ_TEST_BLANK__", "   ");
        assert_eq!(env_get("__LAZYREQ_TEST_BLANK__", 3u32), 3);
    }

    #[test]
    fn test_switches() {
        assert_eq!(parse_switch("ON"), Some(true));
        assert_eq!(parse_switch("no"), Some(false));
        assert_eq!(parse_switch("maybe"), None);

        std::env::set_var("__LAZYREQ_TEST_SWITCH__", "off");
        assert!(!env_get_bool("__LAZYREQ_TEST_SWITCH__", true));
        std::env::set_var("__LAZYREQ_TEST_SWITCH__", "perhaps");
        assert!(env_get_bool("__LAZYREQ_TEST_SWITCH__", true));
    }
}
