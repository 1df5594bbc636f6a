//! # osprobe - capability-probed host primitives
//!
//! One facade over process enumeration and file-system primitives whose
//! availability differs per platform. Ask first, then call:
//!
//! ```ignore
//! use osprobe::{Capability, NativeSupport};
//!
//! let native = NativeSupport::detect();
//! if native.supports(Capability::ProcessList) {
//!     for p in native.processes()? {
//!         println!("{} {:?} {}", p.pid(), p.ppid(), p.command_line());
//!     }
//! }
//! ```
//!
//! Every operation checks its capability before doing anything. Calling
//! an unsupported one returns `NativeError::Unsupported` and touches no OS
//! interface.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    NativeSupport                        │
//! │        supports(), capabilities(), operations           │
//! └─────────────────────────────────────────────────────────┘
//!                 │                         │
//!                 ▼                         ▼
//! ┌───────────────────────────┐   ┌───────────────────────┐
//! │      PlatformBinding      │   │  ZfsSupport (dlopen)  │
//! │  files / procfs / sysctl  │   └───────────────────────┘
//! │  user / pam / movefile    │
//! └───────────────────────────┘
//!                 │
//!                 ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     osprobe-core                        │
//! │  SizedQuery, procargs decoder, layouts, FallbackChain   │
//! └─────────────────────────────────────────────────────────┘
//! ```

#[cfg(unix)]
use std::convert::Infallible;
use std::path::Path;
#[cfg(unix)]
use std::path::PathBuf;

pub use osprobe_core::{
    invoke, Capability, CapabilityProbe, CapabilitySet, ErrorClass, LogLevel, Logger, NativeError,
    NativeResult, Pid, Platform, ProcessArgs, ProcessDescriptor, WordWidth,
};
pub use osprobe_core::{kdebug, kerror, kinfo, ktrace, kwarn};
pub use osprobe_sys::config::{self, SupportConfig};
pub use osprobe_sys::memory::SystemMemory;
#[cfg(unix)]
pub use osprobe_sys::pam::PamSetup;

use osprobe_sys::binding::{self, PlatformBinding};
#[cfg(unix)]
use osprobe_sys::zfs::ZfsSupport;

/// Entry point: the binding for this platform plus optional subsystems.
pub struct NativeSupport {
    binding: PlatformBinding,
    #[cfg(unix)]
    zfs: Option<ZfsSupport>,
    caps: CapabilitySet,
    config: SupportConfig,
}

impl NativeSupport {
    /// Probe with configuration from the environment.
    pub fn detect() -> Self {
        Self::with_config(SupportConfig::from_env())
    }

    pub fn with_config(config: SupportConfig) -> Self {
        let binding = PlatformBinding::new(&config);
        let caps = binding.capabilities();

        #[cfg(unix)]
        let zfs = if config.enable_zfs {
            match ZfsSupport::load(&config) {
                Ok(z) => Some(z),
                Err(e) => {
                    kdebug!(config.log, "ZFS unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };
        #[cfg(unix)]
        let caps = caps.with_if(Capability::Zfs, zfs.is_some());

        kinfo!(
            config.log,
            "{} ({}-bit): {} capabilities",
            Platform::current(),
            WordWidth::current().bits(),
            caps.len()
        );
        Self {
            binding,
            #[cfg(unix)]
            zfs,
            caps,
            config,
        }
    }

    pub fn config(&self) -> &SupportConfig {
        &self.config
    }

    /// Every supported capability.
    pub fn capabilities(&self) -> CapabilitySet {
        self.caps
    }

    /// Snapshot of the process table.
    pub fn processes(&self) -> NativeResult<Vec<ProcessDescriptor>> {
        invoke(self, Capability::ProcessList, || Ok(self.binding.processes()))
    }

    /// True if the ZFS filesystem `name` exists.
    pub fn zfs_exists(&self, name: &str) -> NativeResult<bool> {
        self.require(Capability::Zfs)?;
        self.zfs_exists_unchecked(name)
    }

    #[cfg(unix)]
    fn zfs_exists_unchecked(&self, name: &str) -> NativeResult<bool> {
        match &self.zfs {
            Some(zfs) => zfs.exists(name),
            None => Err(NativeError::Unsupported(Capability::Zfs)),
        }
    }

    #[cfg(not(unix))]
    fn zfs_exists_unchecked(&self, _name: &str) -> NativeResult<bool> {
        Err(NativeError::Unsupported(Capability::Zfs))
    }

    /// Move `from` to `to`, replacing `to`.
    pub fn move_file(&self, from: &Path, to: &Path) -> NativeResult<()> {
        invoke(self, Capability::WindowsFileMove, || {
            osprobe_sys::movefile::move_file(from, to, self.config.log)
        })
    }

    /// OS message for the calling thread's last error.
    pub fn last_error(&self) -> NativeResult<String> {
        invoke(self, Capability::ErrorReporting, || Ok(binding::last_error()))
    }
}

#[cfg(unix)]
impl NativeSupport {
    pub fn chmod(&self, path: &Path, mode: u32) -> NativeResult<()> {
        invoke(self, Capability::Chmod, || self.binding.chmod(path, mode))
    }

    pub fn chown(&self, path: &Path, uid: u32, gid: u32) -> NativeResult<()> {
        invoke(self, Capability::Chown, || self.binding.chown(path, uid, gid))
    }

    /// Full `st_mode` of `path`.
    pub fn mode(&self, path: &Path) -> NativeResult<u32> {
        invoke(self, Capability::FileMode, || self.binding.mode(path))
    }

    /// chmod u+w.
    pub fn make_writable(&self, path: &Path) -> NativeResult<()> {
        invoke(self, Capability::FileWritable, || self.binding.make_writable(path))
    }

    /// Create `link` pointing at `target`.
    pub fn create_symlink(&self, target: &Path, link: &Path) -> NativeResult<()> {
        invoke(self, Capability::Symlink, || self.binding.create_symlink(target, link))
    }

    /// Target of `link`, `None` if it is not a symlink.
    pub fn resolve_symlink(&self, link: &Path) -> NativeResult<Option<PathBuf>> {
        invoke(self, Capability::ResolveLink, || self.binding.resolve_symlink(link))
    }

    pub fn system_memory(&self) -> NativeResult<SystemMemory> {
        invoke(self, Capability::SystemMemory, || self.binding.system_memory())
    }

    pub fn euid(&self) -> NativeResult<u32> {
        invoke(self, Capability::Euid, || Ok(self.binding.euid()))
    }

    pub fn egid(&self) -> NativeResult<u32> {
        invoke(self, Capability::Egid, || Ok(self.binding.egid()))
    }

    pub fn process_user(&self) -> NativeResult<String> {
        invoke(self, Capability::Euid, || self.binding.process_user())
    }

    pub fn check_unix_user(&self, name: &str) -> NativeResult<bool> {
        invoke(self, Capability::UnixUser, || self.binding.check_unix_user(name))
    }

    pub fn check_unix_group(&self, name: &str) -> NativeResult<bool> {
        invoke(self, Capability::UnixGroup, || self.binding.check_unix_group(name))
    }

    /// Authenticate through PAM; `service` defaults to the configured
    /// one ("sshd"). Returns the user's groups.
    pub fn pam_authenticate(
        &self,
        service: Option<&str>,
        user: &str,
        password: &str,
    ) -> NativeResult<Vec<String>> {
        invoke(self, Capability::PamAuth, || match self.binding.pam() {
            Some(pam) => pam.authenticate(service, user, password),
            None => Err(NativeError::Unsupported(Capability::PamAuth)),
        })
    }

    pub fn check_pam_setup(&self) -> NativeResult<PamSetup> {
        invoke(self, Capability::PamAuth, || self.binding.check_pam_setup())
    }

    /// True if `restart_process` knows what to exec.
    pub fn can_restart_process(&self) -> NativeResult<bool> {
        invoke(self, Capability::ProcessRestart, || Ok(self.binding.can_restart_process()))
    }

    /// Re-exec this program with its own arguments, `extra_env` added to
    /// the environment. Descriptors above stderr are closed in the new
    /// image. Returns only on failure.
    pub fn restart_process(&self, extra_env: &[(String, String)]) -> NativeResult<Infallible> {
        invoke(self, Capability::ProcessRestart, || self.binding.restart_process(extra_env))
    }
}

impl CapabilityProbe for NativeSupport {
    fn supports(&self, cap: Capability) -> bool {
        self.caps.contains(cap)
    }
}
