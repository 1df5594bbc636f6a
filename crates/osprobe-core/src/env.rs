//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `SupportConfig::from_env` and
//! `Logger::from_env`.
//!
//! ```ignore
//! use osprobe_core::env::{env_get, env_get_bool};
//!
//! let retries: u32 = env_get("OSPROBE_QUERY_MAX_RETRIES", 16);
//! let zfs = env_get_bool("OSPROBE_ENABLE_ZFS", true);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` only if `key` is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag. "1", "true", "yes", "on" are true; "0", "false", "no",
/// "off" are false; anything else (or unset) gives `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Raw string value; empty values count as unset.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_returns_default() {
        let v: u32 = env_get("__OSPROBE_TEST_UNSET__", 16);
        assert_eq!(v, 16);
        assert!(env_get_bool("__OSPROBE_TEST_UNSET__", true));
        assert_eq!(env_get_str("__OSPROBE_TEST_UNSET__", "sshd"), "sshd");
        assert_eq!(env_get_opt::<usize>("__OSPROBE_TEST_UNSET__"), None);
    }

    #[test]
    fn parses_numbers() {
        std::env::set_var("__OSPROBE_TEST_NUM__", " 4096 ");
        let v: usize = env_get("__OSPROBE_TEST_NUM__", 0);
        assert_eq!(v, 4096);
        std::env::set_var("__OSPROBE_TEST_NUM__", "many");
        let v: usize = env_get("__OSPROBE_TEST_NUM__", 7);
        assert_eq!(v, 7);
        std::env::remove_var("__OSPROBE_TEST_NUM__");
    }

    #[test]
    fn bool_keeps_default_on_garbage() {
        std::env::set_var("__OSPROBE_TEST_BOOL__", "No");
        assert!(!env_get_bool("__OSPROBE_TEST_BOOL__", true));
        std::env::set_var("__OSPROBE_TEST_BOOL__", "ON");
        assert!(env_get_bool("__OSPROBE_TEST_BOOL__", false));
        std::env::set_var("__OSPROBE_TEST_BOOL__", "maybe");
        assert!(env_get_bool("__OSPROBE_TEST_BOOL__", true));
        assert!(!env_get_bool("__OSPROBE_TEST_BOOL__", false));
        std::env::remove_var("__OSPROBE_TEST_BOOL__");
    }

    #[test]
    fn empty_string_is_unset() {
        std::env::set_var("__OSPROBE_TEST_STR__", "");
        assert_eq!(env_get_str("__OSPROBE_TEST_STR__", "login"), "login");
        std::env::remove_var("__OSPROBE_TEST_STR__");
    }
}
