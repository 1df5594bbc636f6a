//! Per-platform bindings.
//!
//! A binding owns the OS entry points for one platform family and
//! answers capability probes from a set fixed at construction:
//! base capabilities of the family, plus optional subsystems that loaded
//! (libpam, a process enumerator). [`PlatformBinding`] names the one
//! compiled for this target.

use osprobe_core::capability::{Capability, CapabilityProbe, CapabilitySet};
use osprobe_core::process::ProcessDescriptor;

/// Source of process snapshots.
pub trait ProcessEnumerator: Send + Sync {
    fn processes(&self) -> Vec<ProcessDescriptor>;
}

/// OS message for the calling thread's last error code.
pub fn last_error() -> String {
    std::io::Error::last_os_error().to_string()
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub use self::unix::UnixBinding;
        pub type PlatformBinding = UnixBinding;
    } else if #[cfg(windows)] {
        pub use self::windows::WindowsBinding;
        pub type PlatformBinding = WindowsBinding;
    }
}

#[cfg(unix)]
mod unix {
    use std::convert::Infallible;
    use std::path::{Path, PathBuf};

    use osprobe_core::error::NativeResult;
    use osprobe_core::fallback::FileBinding;
    use osprobe_core::kprint::Logger;
    use osprobe_core::kdebug;

    use super::*;
    use crate::config::SupportConfig;
    use crate::files::{self, UnixFiles};
    use crate::pam::{self, PamSetup, PamSupport};
    use crate::restart;
    use crate::user;

    const BASE: CapabilitySet = CapabilitySet::of(&[
        Capability::Chmod,
        Capability::Chown,
        Capability::FileMode,
        Capability::FileWritable,
        Capability::Symlink,
        Capability::ResolveLink,
        Capability::Euid,
        Capability::Egid,
        Capability::UnixUser,
        Capability::UnixGroup,
        Capability::ErrorReporting,
        Capability::ProcessRestart,
    ]);

    pub struct UnixBinding {
        files: UnixFiles,
        pam: Option<PamSupport>,
        enumerator: Option<Box<dyn ProcessEnumerator>>,
        caps: CapabilitySet,
        log: Logger,
    }

    impl UnixBinding {
        pub fn new(config: &SupportConfig) -> Self {
            let log = config.log.tag("unix");
            let pam = match PamSupport::load(config) {
                Ok(p) => Some(p),
                Err(e) => {
                    kdebug!(log, "PAM unavailable: {}", e);
                    None
                }
            };
            let enumerator = process_enumerator(config);
            let caps = BASE
                .with_if(Capability::PamAuth, pam.is_some())
                .with_if(Capability::ProcessList, enumerator.is_some())
                .with_if(Capability::SystemMemory, cfg!(target_os = "linux"));
            kdebug!(log, "unix binding: {:?}", caps);
            Self {
                files: files::unix_files(config),
                pam,
                enumerator,
                caps,
                log,
            }
        }

        pub fn capabilities(&self) -> CapabilitySet {
            self.caps
        }

        pub fn files(&self) -> &UnixFiles {
            &self.files
        }

        pub fn chmod(&self, path: &Path, mode: u32) -> NativeResult<()> {
            self.files.chmod(path, mode)
        }

        pub fn chown(&self, path: &Path, uid: u32, gid: u32) -> NativeResult<()> {
            files::chown(path, uid, gid)
        }

        pub fn mode(&self, path: &Path) -> NativeResult<u32> {
            files::mode(path)
        }

        pub fn make_writable(&self, path: &Path) -> NativeResult<()> {
            files::make_writable(&self.files, path)
        }

        pub fn create_symlink(&self, target: &Path, link: &Path) -> NativeResult<()> {
            kdebug!(self.log, "symlink {} -> {}", link.display(), target.display());
            self.files.symlink(target, link)
        }

        pub fn resolve_symlink(&self, link: &Path) -> NativeResult<Option<PathBuf>> {
            self.files.readlink(link)
        }

        pub fn system_memory(&self) -> NativeResult<crate::memory::SystemMemory> {
            crate::memory::system_memory()
        }

        pub fn euid(&self) -> u32 {
            user::euid()
        }

        pub fn egid(&self) -> u32 {
            user::egid()
        }

        pub fn process_user(&self) -> NativeResult<String> {
            user::process_user()
        }

        pub fn check_unix_user(&self, name: &str) -> NativeResult<bool> {
            user::check_unix_user(name)
        }

        pub fn check_unix_group(&self, name: &str) -> NativeResult<bool> {
            user::check_unix_group(name)
        }

        /// `None` when libpam did not load.
        pub fn pam(&self) -> Option<&PamSupport> {
            self.pam.as_ref()
        }

        pub fn check_pam_setup(&self) -> NativeResult<PamSetup> {
            pam::check_pam_setup()
        }

        /// True if the executable and arguments of this process are known.
        pub fn can_restart_process(&self) -> bool {
            restart::can_restart()
        }

        pub fn restart_process(&self, extra_env: &[(String, String)]) -> NativeResult<Infallible> {
            restart::restart(extra_env, self.log)
        }

        /// Empty when no enumerator exists for this platform.
        pub fn processes(&self) -> Vec<ProcessDescriptor> {
            self.enumerator
                .as_ref()
                .map(|e| e.processes())
                .unwrap_or_default()
        }
    }

    impl CapabilityProbe for UnixBinding {
        fn supports(&self, cap: Capability) -> bool {
            self.caps.contains(cap)
        }
    }

    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            struct Procfs {
                log: Logger,
            }

            impl ProcessEnumerator for Procfs {
                fn processes(&self) -> Vec<ProcessDescriptor> {
                    crate::procfs::processes(self.log)
                }
            }

            fn process_enumerator(config: &SupportConfig) -> Option<Box<dyn ProcessEnumerator>> {
                Some(Box::new(Procfs { log: config.log.tag("procfs") }))
            }
        } else if #[cfg(target_os = "macos")] {
            use std::sync::Arc;

            use osprobe_core::layout::ProcTableLayout;
            use osprobe_core::platform::{Platform, WordWidth};
            use osprobe_core::query::KernelQuery;

            use crate::snapshot::TableEnumerator;
            use crate::sysctl::SysctlQuery;

            impl<Q: KernelQuery + 'static> ProcessEnumerator for TableEnumerator<Q> {
                fn processes(&self) -> Vec<ProcessDescriptor> {
                    self.snapshot()
                }
            }

            fn process_enumerator(config: &SupportConfig) -> Option<Box<dyn ProcessEnumerator>> {
                let layout = ProcTableLayout::lookup(Platform::current(), WordWidth::current())?;
                match TableEnumerator::new(Arc::new(SysctlQuery), layout, config) {
                    Ok(e) => Some(Box::new(e)),
                    Err(e) => {
                        kdebug!(config.log, "process listing disabled: {}", e);
                        None
                    }
                }
            }
        } else {
            fn process_enumerator(_config: &SupportConfig) -> Option<Box<dyn ProcessEnumerator>> {
                None
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn binding() -> UnixBinding {
            UnixBinding::new(&SupportConfig::default().log(Logger::silent()))
        }

        #[test]
        fn base_capabilities() {
            let b = binding();
            for cap in [
                Capability::Chmod,
                Capability::Symlink,
                Capability::ResolveLink,
                Capability::Euid,
                Capability::ErrorReporting,
                Capability::ProcessRestart,
            ] {
                assert!(b.supports(cap), "{}", cap);
            }
            assert!(b.can_restart_process());
            assert!(!b.supports(Capability::WindowsFileMove));
            assert!(!b.supports(Capability::Zfs));
        }

        #[test]
        fn pam_capability_tracks_library() {
            let b = UnixBinding::new(
                &SupportConfig::default()
                    .pam_library("libosprobe-no-such-pam.so")
                    .log(Logger::silent()),
            );
            assert!(!b.supports(Capability::PamAuth));
            assert!(b.pam().is_none());
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn linux_lists_processes() {
            let b = binding();
            assert!(b.supports(Capability::ProcessList));
            assert!(b.supports(Capability::SystemMemory));
            let me = std::process::id() as i32;
            assert!(b.processes().iter().any(|d| d.pid() == me));
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::path::Path;

    use osprobe_core::error::NativeResult;
    use osprobe_core::kprint::Logger;

    use super::*;
    use crate::config::SupportConfig;
    use crate::winproc::Toolhelp;

    const CAPS: CapabilitySet = CapabilitySet::of(&[
        Capability::ProcessList,
        Capability::WindowsFileMove,
        Capability::ErrorReporting,
    ]);

    pub struct WindowsBinding {
        enumerator: Toolhelp,
        log: Logger,
    }

    impl WindowsBinding {
        pub fn new(config: &SupportConfig) -> Self {
            let log = config.log.tag("windows");
            Self {
                enumerator: Toolhelp::new(config.log.tag("toolhelp")),
                log,
            }
        }

        pub fn capabilities(&self) -> CapabilitySet {
            CAPS
        }

        pub fn move_file(&self, from: &Path, to: &Path) -> NativeResult<()> {
            crate::movefile::move_file(from, to, self.log)
        }

        /// Parents are unknown on this platform: every `ppid()` is `None`.
        pub fn processes(&self) -> Vec<ProcessDescriptor> {
            self.enumerator.processes()
        }
    }

    impl CapabilityProbe for WindowsBinding {
        fn supports(&self, cap: Capability) -> bool {
            CAPS.contains(cap)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn lists_current_process() {
            let b = WindowsBinding::new(&SupportConfig::default().log(Logger::silent()));
            assert!(b.supports(Capability::ProcessList));
            assert!(!b.supports(Capability::ProcessRestart));
            let me = std::process::id() as i32;
            let procs = b.processes();
            let d = procs.iter().find(|d| d.pid() == me).unwrap();
            assert_eq!(d.ppid(), None);
        }
    }
}
