//! Platform and word-width detection.

use core::fmt;

/// Operating system family the binding is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOs,
    Solaris,
    /// Any other POSIX system (BSDs, AIX, ...).
    OtherUnix,
    Windows,
}

impl Platform {
    /// The platform this crate was compiled for.
    pub const fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(any(target_os = "solaris", target_os = "illumos")) {
            Platform::Solaris
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::OtherUnix
        }
    }

    pub const fn is_unix(self) -> bool {
        !matches!(self, Platform::Windows)
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Solaris => "solaris",
            Platform::OtherUnix => "unix",
            Platform::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pointer width of the running process, which decides the kernel
/// structure layout we get back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordWidth {
    Bits32,
    Bits64,
}

impl WordWidth {
    pub const fn current() -> Self {
        if cfg!(target_pointer_width = "64") {
            WordWidth::Bits64
        } else {
            WordWidth::Bits32
        }
    }

    pub const fn bits(self) -> u32 {
        match self {
            WordWidth::Bits32 => 32,
            WordWidth::Bits64 => 64,
        }
    }
}
