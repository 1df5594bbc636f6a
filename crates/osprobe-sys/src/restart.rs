//! Restart the running program in place.
//!
//! Every descriptor above stderr is marked close-on-exec, then the current
//! executable is exec'd with the arguments it was started with. Extra
//! environment entries are set before the exec and inherited by the new
//! image.

use std::convert::Infallible;
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::{execv, sysconf, SysconfVar};
use osprobe_core::error::{NativeError, NativeResult};
use osprobe_core::kinfo;
use osprobe_core::kprint::Logger;

use crate::files::errno_err;

/// Descriptors 0..=2 stay open across the exec.
const FIRST_CLOSED_FD: RawFd = 3;
/// Used when `OPEN_MAX` is indeterminate.
const FALLBACK_FD_LIMIT: RawFd = 1024;

/// Executable and argument vector of the running program.
#[derive(Debug, Clone)]
pub struct RestartPlan {
    pub exec: PathBuf,
    pub args: Vec<OsString>,
}

impl RestartPlan {
    /// `None` if the executable path or the arguments cannot be determined.
    pub fn current() -> Option<Self> {
        let exec = std::env::current_exe().ok()?;
        let args: Vec<OsString> = std::env::args_os().collect();
        if args.is_empty() {
            return None;
        }
        Some(Self { exec, args })
    }
}

pub fn can_restart() -> bool {
    RestartPlan::current().is_some()
}

/// Set `FD_CLOEXEC` on every open descriptor in `first..limit`. Returns
/// the number of descriptors marked.
pub fn mark_cloexec(first: RawFd, limit: RawFd) -> usize {
    let mut marked = 0;
    for fd in first..limit {
        let Ok(bits) = fcntl(fd, FcntlArg::F_GETFD) else {
            continue;
        };
        let flags = FdFlag::from_bits_truncate(bits) | FdFlag::FD_CLOEXEC;
        if fcntl(fd, FcntlArg::F_SETFD(flags)).is_ok() {
            marked += 1;
        }
    }
    marked
}

fn fd_limit() -> RawFd {
    match sysconf(SysconfVar::OPEN_MAX) {
        Ok(Some(n)) if n > 0 => RawFd::try_from(n).unwrap_or(RawFd::MAX),
        _ => FALLBACK_FD_LIMIT,
    }
}

/// Replace the process image with a fresh start of the same program.
/// Returns only on failure.
pub fn restart(extra_env: &[(String, String)], log: Logger) -> NativeResult<Infallible> {
    let plan = RestartPlan::current().ok_or_else(|| {
        NativeError::InvalidInput("executable or arguments of this process unknown".to_string())
    })?;
    for (key, value) in extra_env {
        check_env_entry(key, value)?;
    }

    let exec = c_string(plan.exec.into_os_string())?;
    let argv = plan
        .args
        .into_iter()
        .map(c_string)
        .collect::<NativeResult<Vec<_>>>()?;

    for (key, value) in extra_env {
        std::env::set_var(key, value);
    }
    let marked = mark_cloexec(FIRST_CLOSED_FD, fd_limit());
    kinfo!(
        log,
        "restarting {:?} with {} arguments, {} descriptors close on exec",
        exec,
        argv.len(),
        marked
    );

    match execv(&exec, &argv) {
        Ok(never) => match never {},
        Err(e) => Err(errno_err("execv", e)),
    }
}

fn check_env_entry(key: &str, value: &str) -> NativeResult<()> {
    if key.is_empty() || key.contains(['=', '\0']) || value.contains('\0') {
        return Err(NativeError::InvalidInput(format!("environment entry {:?}", key)));
    }
    Ok(())
}

fn c_string(s: OsString) -> NativeResult<CString> {
    CString::new(s.into_vec())
        .map_err(|e| NativeError::InvalidInput(format!("interior NUL at {}", e.nul_position())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloexec_set(fd: RawFd) -> bool {
        let bits = fcntl(fd, FcntlArg::F_GETFD).unwrap();
        FdFlag::from_bits_truncate(bits).contains(FdFlag::FD_CLOEXEC)
    }

    #[test]
    fn test_harness_can_restart() {
        let plan = RestartPlan::current().unwrap();
        assert!(can_restart());
        assert!(!plan.args.is_empty());
        assert!(plan.exec.is_absolute());
    }

    #[test]
    fn inherited_descriptor_becomes_cloexec() {
        // dup(2) never sets FD_CLOEXEC on the copy.
        let fd = unsafe { libc::dup(2) };
        assert!(fd >= FIRST_CLOSED_FD);
        assert!(!cloexec_set(fd));

        assert_eq!(mark_cloexec(fd, fd + 1), 1);
        assert!(cloexec_set(fd));

        unsafe { libc::close(fd) };
    }

    #[test]
    fn closed_descriptors_are_skipped() {
        // Far above anything the test process opens.
        assert_eq!(mark_cloexec(FALLBACK_FD_LIMIT - 8, FALLBACK_FD_LIMIT), 0);
    }

    #[test]
    fn fd_limit_is_positive() {
        assert!(fd_limit() > FIRST_CLOSED_FD);
    }

    #[test]
    fn bad_environment_rejected_before_exec() {
        let err = restart(&[("A=B".to_string(), "1".to_string())], Logger::silent()).unwrap_err();
        assert!(matches!(err, NativeError::InvalidInput(_)));
        let err = restart(&[(String::new(), "1".to_string())], Logger::silent()).unwrap_err();
        assert!(matches!(err, NativeError::InvalidInput(_)));
    }
}
