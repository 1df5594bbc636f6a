//! Capability registry.
//!
//! A `CapabilityProbe` answers "can this binding do X on the running
//! platform?" without touching the OS. Callers probe first; operations
//! invoked anyway go through [`invoke`], which refuses unsupported ones
//! with `NativeError::Unsupported` before the operation body runs.
//!
//! # Implementors
//!
//! - `CapabilitySet`: a bitset built once when a binding is constructed.
//!   Lookup is one mask test.
//! - The platform bindings in `osprobe-sys` expose their set through
//!   `CapabilityProbe` and never change it afterwards.

use core::fmt;

use crate::error::{NativeError, NativeResult};

/// A named OS-level operation whose availability depends on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Capability {
    /// Enumerate processes with their arguments and environment.
    ProcessList = 0,
    Chmod = 1,
    Chown = 2,
    /// Read the numeric file mode.
    FileMode = 3,
    /// OR the user-write bit into an existing mode.
    FileWritable = 4,
    /// Create symbolic links.
    Symlink = 5,
    /// Resolve symbolic link targets.
    ResolveLink = 6,
    SystemMemory = 7,
    Euid = 8,
    Egid = 9,
    /// Look up users in the password database.
    UnixUser = 10,
    /// Look up groups in the group database.
    UnixGroup = 11,
    /// Authenticate through libpam.
    PamAuth = 12,
    /// libzfs loaded and initialized.
    Zfs = 13,
    WindowsFileMove = 14,
    /// Translate the last OS error code into a message.
    ErrorReporting = 15,
    /// Re-exec the current program with its own arguments.
    ProcessRestart = 16,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 17] = [
        Capability::ProcessList,
        Capability::Chmod,
        Capability::Chown,
        Capability::FileMode,
        Capability::FileWritable,
        Capability::Symlink,
        Capability::ResolveLink,
        Capability::SystemMemory,
        Capability::Euid,
        Capability::Egid,
        Capability::UnixUser,
        Capability::UnixGroup,
        Capability::PamAuth,
        Capability::Zfs,
        Capability::WindowsFileMove,
        Capability::ErrorReporting,
        Capability::ProcessRestart,
    ];

    #[inline]
    const fn bit(self) -> u32 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Capability::ProcessList => "PROCESS_LIST",
            Capability::Chmod => "CHMOD",
            Capability::Chown => "CHOWN",
            Capability::FileMode => "FILE_MODE",
            Capability::FileWritable => "FILE_WRITABLE",
            Capability::Symlink => "SYMLINK",
            Capability::ResolveLink => "RESOLVE_LINK",
            Capability::SystemMemory => "SYSTEM_MEMORY",
            Capability::Euid => "EUID",
            Capability::Egid => "EGID",
            Capability::UnixUser => "UNIX_USER",
            Capability::UnixGroup => "UNIX_GROUP",
            Capability::PamAuth => "PAM_AUTH",
            Capability::Zfs => "ZFS",
            Capability::WindowsFileMove => "WINDOWS_FILE_MOVE",
            Capability::ErrorReporting => "ERROR_REPORTING",
            Capability::ProcessRestart => "PROCESS_RESTART",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pure predicate over capabilities.
///
/// Implementations must be side-effect free and must return the same
/// answer for the lifetime of the binding.
pub trait CapabilityProbe: Send + Sync {
    fn supports(&self, cap: Capability) -> bool;

    /// Fail with `Unsupported` unless `cap` is available.
    fn require(&self, cap: Capability) -> NativeResult<()> {
        if self.supports(cap) {
            Ok(())
        } else {
            Err(NativeError::Unsupported(cap))
        }
    }

    /// Supported capabilities, in declaration order (for diagnostics).
    fn supported(&self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .copied()
            .filter(|&c| self.supports(c))
            .collect()
    }
}

/// Run `op` only if `probe` reports `cap` as supported.
///
/// The closure is never called for an unsupported capability, so no OS
/// call can happen behind a `false` probe.
#[inline]
pub fn invoke<P, T, F>(probe: &P, cap: Capability, op: F) -> NativeResult<T>
where
    P: CapabilityProbe + ?Sized,
    F: FnOnce() -> NativeResult<T>,
{
    probe.require(cap)?;
    op()
}

/// Fixed set of capabilities, one bit each.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);

    pub const fn of(caps: &[Capability]) -> Self {
        let mut bits = 0u32;
        let mut i = 0;
        while i < caps.len() {
            bits |= caps[i].bit();
            i += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    #[must_use]
    pub const fn without(self, cap: Capability) -> Self {
        Self(self.0 & !cap.bit())
    }

    /// Add `cap` only when `present` holds (optional subsystems).
    #[must_use]
    pub const fn with_if(self, cap: Capability, present: bool) -> Self {
        if present {
            self.with(cap)
        } else {
            self
        }
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl CapabilityProbe for CapabilitySet {
    #[inline]
    fn supports(&self, cap: Capability) -> bool {
        self.contains(cap)
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(Capability::ALL.iter().filter(|c| self.contains(**c)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const UNIXISH: CapabilitySet = CapabilitySet::of(&[
        Capability::Chmod,
        Capability::Symlink,
        Capability::ErrorReporting,
    ]);

    #[test]
    fn set_membership() {
        assert!(UNIXISH.supports(Capability::Chmod));
        assert!(UNIXISH.supports(Capability::ErrorReporting));
        assert!(!UNIXISH.supports(Capability::Zfs));
        assert_eq!(UNIXISH.len(), 3);
        assert!(CapabilitySet::EMPTY.is_empty());
    }

    #[test]
    fn optional_subsystem_toggles() {
        let with_zfs = UNIXISH.with_if(Capability::Zfs, true);
        let without_zfs = UNIXISH.with_if(Capability::Zfs, false);
        assert!(with_zfs.supports(Capability::Zfs));
        assert!(!without_zfs.supports(Capability::Zfs));
        assert!(!with_zfs.without(Capability::Zfs).supports(Capability::Zfs));
    }

    #[test]
    fn all_bits_distinct() {
        let all = CapabilitySet::of(&Capability::ALL);
        assert_eq!(all.len(), Capability::ALL.len());
    }

    #[test]
    fn unsupported_operation_never_runs() {
        let calls = Cell::new(0);
        let result = invoke(&UNIXISH, Capability::Zfs, || {
            calls.set(calls.get() + 1);
            Ok(())
        });
        assert!(matches!(result, Err(NativeError::Unsupported(Capability::Zfs))));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn supported_operation_runs_once() {
        let calls = Cell::new(0);
        let result = invoke(&UNIXISH, Capability::Chmod, || {
            calls.set(calls.get() + 1);
            Ok(7)
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn supported_listing_in_order() {
        assert_eq!(
            UNIXISH.supported(),
            vec![Capability::Chmod, Capability::Symlink, Capability::ErrorReporting]
        );
    }
}
