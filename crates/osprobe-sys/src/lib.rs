//! # osprobe-sys
//!
//! Platform bindings behind osprobe's capability registry.
//!
//! | module      | platform | provides                                   |
//! |-------------|----------|--------------------------------------------|
//! | `files`     | unix     | chmod/symlink/readlink fallback chain      |
//! | `procfs`    | linux    | process list from `/proc`                  |
//! | `sysctl`    | macos    | `KernelQuery` over `sysctl(3)`             |
//! | `snapshot`  | all      | process list from a fixed-stride table     |
//! | `memory`    | linux    | `/proc/meminfo`                            |
//! | `user`      | unix     | ids, passwd and group lookups              |
//! | `pam`       | unix     | libpam authentication, shadow diagnostics  |
//! | `zfs`       | unix     | libzfs dataset probe                       |
//! | `movefile`  | all      | replacing move with cross-volume copy      |
//! | `restart`   | unix     | re-exec the running program                |
//! | `winproc`   | windows  | Toolhelp process list, PEB arguments       |
//!
//! `binding::PlatformBinding` ties them together for the build target.

pub mod binding;
pub mod config;
pub mod memory;
pub mod movefile;
pub mod snapshot;
pub mod winproc;

#[cfg(unix)]
pub mod dl;
#[cfg(unix)]
pub mod files;
#[cfg(unix)]
pub mod pam;
#[cfg(unix)]
pub mod restart;
#[cfg(unix)]
pub mod user;
#[cfg(unix)]
pub mod zfs;

#[cfg(target_os = "linux")]
pub mod procfs;
#[cfg(target_os = "macos")]
pub mod sysctl;

pub use binding::{last_error, PlatformBinding, ProcessEnumerator};
pub use config::SupportConfig;
pub use memory::SystemMemory;
