//! Kernel-style print macros for osprobe
//!
//! Leveled, optionally-flushing stderr output. Unlike a process-wide
//! logger, every binding carries its own [`Logger`] value, handed to it at
//! construction through its configuration.
//!
//! # Environment Variables
//!
//! - `OSPROBE_FLUSH_EPRINT=1` - Flush stderr after each line
//! - `OSPROBE_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace (or 0-5)
//!
//! # Usage
//!
//! ```ignore
//! use osprobe_core::kprint::Logger;
//! use osprobe_core::{kwarn, kdebug};
//!
//! let log = Logger::from_env().tag("darwin");
//! kwarn!(log, "Failed to obtain process list: {}", err);
//! kdebug!(log, "pid {} not inspectable", pid);
//! ```

use std::io::Write;

use crate::env::{env_get_bool, env_get_str};

/// Log levels (matches common conventions)
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
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; unknown values give `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

/// Per-binding log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Logger {
    level: LogLevel,
    flush: bool,
    tag: &'static str,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger {
    pub const fn new(level: LogLevel) -> Self {
        Self {
            level,
            flush: false,
            tag: "osprobe",
        }
    }

    /// A logger that prints nothing.
    pub const fn silent() -> Self {
        Self::new(LogLevel::Off)
    }

    /// Read `OSPROBE_LOG_LEVEL` and `OSPROBE_FLUSH_EPRINT`.
    pub fn from_env() -> Self {
        let level = LogLevel::parse(&env_get_str("OSPROBE_LOG_LEVEL", "info"))
            .unwrap_or(LogLevel::Info);
        Self::new(level).flush(env_get_bool("OSPROBE_FLUSH_EPRINT", false))
    }

    pub const fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub const fn flush(mut self, enabled: bool) -> Self {
        self.flush = enabled;
        self
    }

    /// Same sink, different component name in the output.
    pub const fn tag(mut self, tag: &'static str) -> Self {
        self.tag = tag;
        self
    }

    pub fn current_level(&self) -> LogLevel {
        self.level
    }

    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level <= self.level
    }

    /// Write one line. Holds the stderr lock for the whole line.
    #[doc(hidden)]
    pub fn _log(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = write!(handle, "{} {}: ", level.prefix(), self.tag);
        let _ = handle.write_fmt(args);
        let _ = handle.write_all(b"\n");
        if self.flush {
            let _ = handle.flush();
        }
    }
}

// ============================================================================
// Public Macros
// ============================================================================

/// Error level log (always shown unless logging is off)
#[macro_export]
macro_rules! kerror {
    ($log:expr, $($arg:tt)*) => {{
        $log._log($crate::kprint::LogLevel::Error, format_args!($($arg)*));
    }};
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($log:expr, $($arg:tt)*) => {{
        $log._log($crate::kprint::LogLevel::Warn, format_args!($($arg)*));
    }};
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($log:expr, $($arg:tt)*) => {{
        $log._log($crate::kprint::LogLevel::Info, format_args!($($arg)*));
    }};
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    ($log:expr, $($arg:tt)*) => {{
        $log._log($crate::kprint::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($log:expr, $($arg:tt)*) => {{
        $log._log($crate::kprint::LogLevel::Trace, format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Trace);
    }

    #[test]
    fn test_parse() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("2"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" off "), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_enabled() {
        let log = Logger::new(LogLevel::Warn);
        assert!(log.enabled(LogLevel::Error));
        assert!(log.enabled(LogLevel::Warn));
        assert!(!log.enabled(LogLevel::Info));
        assert!(!Logger::silent().enabled(LogLevel::Error));
        assert!(!log.enabled(LogLevel::Off));
    }

    #[test]
    fn test_loggers_are_independent() {
        let a = Logger::new(LogLevel::Trace).tag("a");
        let b = a.level(LogLevel::Error).tag("b");
        assert_eq!(a.current_level(), LogLevel::Trace);
        assert_eq!(b.current_level(), LogLevel::Error);
    }

    #[test]
    fn test_macros_compile() {
        let log = Logger::silent();
        kerror!(log, "error {}", "msg");
        kwarn!(log, "warn");
        kinfo!(log, "info {}", 1);
        kdebug!(log, "debug");
        ktrace!(log, "trace");
    }
}
