//! Environment variable helpers for `SPIDEV_*` settings.
//!
//! ```ignore
//! use spidev_core::env::{env_get, env_get_opt, env_get_str};
//!
//! let prefix = env_get_str("SPIDEV_THREAD_PREFIX", "spidev");
//! let stack: Option<usize> = env_get_opt("SPIDEV_WORKER_STACK");
//! let polls: u32 = env_get("SPIDEV_SMOKE_POLLS", 200);
//! ```
//!
//! Unset and unparsable values fall back to the default.

use std::str::FromStr;

#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` only when the variable is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Empty values count as unset.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: u32 = env_get("__SPIDEV_TEST_UNSET__", 200);
        assert_eq!(val, 200);
    }

    #[test]
    fn test_env_get_opt_parses_trimmed() {
        std::env::set_var("__SPIDEV_TEST_STACK__", " 65536 ");
        let val: Option<usize> = env_get_opt("__SPIDEV_TEST_STACK__");
        assert_eq!(val, Some(65536));
        std::env::remove_var("__SPIDEV_TEST_STACK__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__SPIDEV_TEST_BAD__", "lots");
        let val: usize = env_get("__SPIDEV_TEST_BAD__", 7);
        assert_eq!(val, 7);
        std::env::remove_var("__SPIDEV_TEST_BAD__");
    }

    #[test]
    fn test_env_get_str_empty_is_unset() {
        std::env::set_var("__SPIDEV_TEST_PREFIX__", "");
        assert_eq!(env_get_str("__SPIDEV_TEST_PREFIX__", "spidev"), "spidev");
        std::env::set_var("__SPIDEV_TEST_PREFIX__", "spi");
        assert_eq!(env_get_str("__SPIDEV_TEST_PREFIX__", "spidev"), "spi");
        std::env::remove_var("__SPIDEV_TEST_PREFIX__");
    }
}
