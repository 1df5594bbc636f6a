//! Error types for osprobe

use core::fmt;

use crate::capability::Capability;
use crate::query::SizedQueryState;

/// Result type for native operations
pub type NativeResult<T> = Result<T, NativeError>;

/// How a caller is expected to react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Undersized buffer during a sized query. Only a `QueryError` carries
    /// this class; `SizedQuery` retries it, so no `NativeError` does.
    TransientRetryable,
    /// Caller may not inspect the target (protected process, partial blob).
    PermissionDenied,
    /// The capability registry reports the operation as unavailable.
    Unsupported,
    /// Everything else. Surfaced unchanged.
    Fatal,
}

/// Errors that can occur in native operations
#[derive(Debug)]
pub enum NativeError {
    /// Operation invoked although its capability is false
    Unsupported(Capability),

    /// OS call failed with an error code
    Os {
        op: &'static str,
        code: i32,
        message: String,
    },

    /// Primary binding could not be linked (library or symbol missing)
    Linkage { symbol: String, reason: String },

    /// Sized query kept reporting an undersized buffer
    RetriesExhausted {
        op: &'static str,
        state: SizedQueryState,
    },

    /// Symlink target longer than the largest buffer tried
    PathTooLong { path: String, limit: usize },

    /// Raw kernel data could not be decoded
    Malformed(&'static str),

    /// PAM rejected the credentials
    Authentication { service: String, message: String },

    /// Argument cannot be passed to the OS (e.g. interior NUL)
    InvalidInput(String),
}

impl NativeError {
    /// OS error with the message produced by the platform's own
    /// error-string facility (`strerror` / `FormatMessage`).
    pub fn os(op: &'static str, code: i32) -> Self {
        NativeError::Os {
            op,
            code,
            message: std::io::Error::from_raw_os_error(code).to_string(),
        }
    }

    /// OS error for the calling thread's current `errno`.
    pub fn last_os(op: &'static str) -> Self {
        let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Self::os(op, code)
    }

    pub fn linkage(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        NativeError::Linkage {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// OS error code, if the error came from an OS call.
    pub fn code(&self) -> Option<i32> {
        match self {
            NativeError::Os { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            NativeError::Unsupported(_) => ErrorClass::Unsupported,
            NativeError::Os { code, .. } if is_permission_code(*code) => {
                ErrorClass::PermissionDenied
            }
            NativeError::Malformed(_) => ErrorClass::PermissionDenied,
            _ => ErrorClass::Fatal,
        }
    }

    /// True for load-time linkage failures, the only errors that may be
    /// routed to a fallback binding.
    #[inline]
    pub fn is_linkage(&self) -> bool {
        matches!(self, NativeError::Linkage { .. })
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        // EPERM, ESRCH, EACCES share values across the unixes we target.
        const PERMISSION_CODES: &[i32] = &[1, 3, 13];
        pub(crate) const ENOMEM: i32 = 12;
    } else {
        // ERROR_ACCESS_DENIED
        const PERMISSION_CODES: &[i32] = &[5];
        // ERROR_NOT_ENOUGH_MEMORY
        pub(crate) const ENOMEM: i32 = 8;
    }
}

pub(crate) fn is_permission_code(code: i32) -> bool {
    PERMISSION_CODES.contains(&code)
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeError::Unsupported(cap) => {
                write!(f, "unsupported operation: {} not available on this platform", cap)
            }
            NativeError::Os { op, code, message } => {
                write!(f, "{} failed: {} (errno {})", op, message, code)
            }
            NativeError::Linkage { symbol, reason } => {
                write!(f, "failed to link {}: {}", symbol, reason)
            }
            NativeError::RetriesExhausted { op, state } => write!(
                f,
                "{}: buffer still undersized after {} retries (last request {} bytes)",
                op, state.retry_count, state.requested_size
            ),
            NativeError::PathTooLong { path, limit } => {
                write!(f, "target path too long: {} (limit {} bytes)", path, limit)
            }
            NativeError::Malformed(what) => write!(f, "malformed kernel data: {}", what),
            NativeError::Authentication { service, message } => {
                write!(f, "PAM authentication via {} failed: {}", service, message)
            }
            NativeError::InvalidInput(what) => write!(f, "invalid input: {}", what),
        }
    }
}

impl std::error::Error for NativeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = NativeError::Unsupported(Capability::Zfs);
        assert_eq!(
            format!("{}", e),
            "unsupported operation: ZFS not available on this platform"
        );

        let e = NativeError::PathTooLong {
            path: "/tmp/x".into(),
            limit: 65536,
        };
        assert_eq!(format!("{}", e), "target path too long: /tmp/x (limit 65536 bytes)");
    }

    #[test]
    fn test_os_error_carries_code_and_message() {
        let e = NativeError::os("readlink", 2);
        assert_eq!(e.code(), Some(2));
        match &e {
            NativeError::Os { message, .. } => assert!(!message.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(format!("{}", e).starts_with("readlink failed: "));
    }

    #[test]
    fn test_classes() {
        assert_eq!(
            NativeError::Unsupported(Capability::Chmod).class(),
            ErrorClass::Unsupported
        );
        assert_eq!(NativeError::Malformed("argc").class(), ErrorClass::PermissionDenied);
        assert_eq!(NativeError::linkage("chmod", "absent").class(), ErrorClass::Fatal);
        assert!(NativeError::linkage("chmod", "absent").is_linkage());
        assert!(!NativeError::os("chmod", 2).is_linkage());
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_codes() {
        assert_eq!(NativeError::os("sysctl", 1).class(), ErrorClass::PermissionDenied);
        assert_eq!(NativeError::os("sysctl", 13).class(), ErrorClass::PermissionDenied);
        assert_eq!(NativeError::os("sysctl", 22).class(), ErrorClass::Fatal);
    }
}
