//! osprobe configuration
//!
//! Library defaults with runtime environment overrides, handed to every
//! binding at construction.
//!
//! ```rust,ignore
//! use osprobe_sys::config::SupportConfig;
//!
//! let config = SupportConfig::from_env()
//!     .pam_service("login")
//!     .enable_zfs(false);
//! ```

use osprobe_core::env::{env_get, env_get_bool, env_get_opt, env_get_str};
use osprobe_core::kprint::Logger;

/// Compile-time defaults.
pub mod defaults {
    /// PAM service used when the caller does not name one.
    pub const PAM_SERVICE: &str = "sshd";
    pub const ENABLE_ZFS: bool = true;
    /// Re-probe/fetch cycles on an undersized sized-query buffer.
    pub const QUERY_MAX_RETRIES: u32 = 16;
    /// First readlink buffer.
    pub const LINK_MIN_BUF: usize = 512;
    /// Largest readlink buffer tried.
    pub const LINK_MAX_BUF: usize = 65536;
    /// Upper clamp for `link_max_buf` overrides.
    pub const LINK_BUF_CEILING: usize = 1 << 24;
    /// Extra byte requested for `KERN_PROCARGS2`; without it some
    /// releases return garbage instead of the argument area.
    pub const PROCARGS_SLACK: usize = 1;
}

#[derive(Debug, Clone)]
pub struct SupportConfig {
    /// Default PAM service name
    pub pam_service: String,
    /// libpam to load instead of the platform's default names
    pub pam_library: Option<String>,
    /// libzfs to load instead of the platform's default names
    pub zfs_library: Option<String>,
    /// Try to load libzfs at all
    pub enable_zfs: bool,
    pub query_max_retries: u32,
    pub link_min_buf: usize,
    pub link_max_buf: usize,
    /// Log sink passed to each binding
    pub log: Logger,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            pam_service: defaults::PAM_SERVICE.to_string(),
            pam_library: None,
            zfs_library: None,
            enable_zfs: defaults::ENABLE_ZFS,
            query_max_retries: defaults::QUERY_MAX_RETRIES,
            link_min_buf: defaults::LINK_MIN_BUF,
            link_max_buf: defaults::LINK_MAX_BUF,
            log: Logger::default(),
        }
    }
}

impl SupportConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `OSPROBE_PAM_SERVICE` - Default PAM service
    /// - `OSPROBE_PAM_LIBRARY` - Path or soname of libpam
    /// - `OSPROBE_ZFS_LIBRARY` - Path or soname of libzfs
    /// - `OSPROBE_ENABLE_ZFS` - Load libzfs (0/1)
    /// - `OSPROBE_QUERY_MAX_RETRIES` - Sized-query retry bound
    /// - `OSPROBE_LINK_MIN_BUF` - First readlink buffer size
    /// - `OSPROBE_LINK_MAX_BUF` - Largest readlink buffer size
    /// - `OSPROBE_LOG_LEVEL`, `OSPROBE_FLUSH_EPRINT` - see `kprint`
    pub fn from_env() -> Self {
        let config = Self {
            pam_service: env_get_str("OSPROBE_PAM_SERVICE", defaults::PAM_SERVICE),
            pam_library: env_get_opt("OSPROBE_PAM_LIBRARY"),
            zfs_library: env_get_opt("OSPROBE_ZFS_LIBRARY"),
            enable_zfs: env_get_bool("OSPROBE_ENABLE_ZFS", defaults::ENABLE_ZFS),
            query_max_retries: env_get("OSPROBE_QUERY_MAX_RETRIES", defaults::QUERY_MAX_RETRIES),
            link_min_buf: env_get("OSPROBE_LINK_MIN_BUF", defaults::LINK_MIN_BUF),
            link_max_buf: env_get("OSPROBE_LINK_MAX_BUF", defaults::LINK_MAX_BUF),
            log: Logger::from_env(),
        };
        let (min, max) = (config.link_min_buf, config.link_max_buf);
        config.link_buffers(min, max)
    }

    // Builder methods

    pub fn pam_service(mut self, service: impl Into<String>) -> Self {
        self.pam_service = service.into();
        self
    }

    pub fn pam_library(mut self, lib: impl Into<String>) -> Self {
        self.pam_library = Some(lib.into());
        self
    }

    pub fn zfs_library(mut self, lib: impl Into<String>) -> Self {
        self.zfs_library = Some(lib.into());
        self
    }

    pub fn enable_zfs(mut self, enabled: bool) -> Self {
        self.enable_zfs = enabled;
        self
    }

    pub fn query_max_retries(mut self, n: u32) -> Self {
        self.query_max_retries = n;
        self
    }

    /// Both sizes are clamped to `1..=LINK_BUF_CEILING`, max never below min.
    pub fn link_buffers(mut self, min: usize, max: usize) -> Self {
        self.link_min_buf = min.clamp(1, defaults::LINK_BUF_CEILING);
        self.link_max_buf = max.clamp(self.link_min_buf, defaults::LINK_BUF_CEILING);
        self
    }

    pub fn log(mut self, log: Logger) -> Self {
        self.log = log;
        self
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        eprintln!("osprobe configuration:");
        eprintln!("  pam_service:       {}", self.pam_service);
        eprintln!(
            "  pam_library:       {}",
            self.pam_library.as_deref().unwrap_or("(platform default)")
        );
        eprintln!(
            "  zfs_library:       {}",
            self.zfs_library.as_deref().unwrap_or("(platform default)")
        );
        eprintln!("  enable_zfs:        {}", self.enable_zfs);
        eprintln!("  query_max_retries: {}", self.query_max_retries);
        eprintln!("  link buffers:      {}..={}", self.link_min_buf, self.link_max_buf);
        eprintln!("  log level:         {:?}", self.log.current_level());
    }
}
