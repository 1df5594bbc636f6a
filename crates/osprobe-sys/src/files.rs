//! File primitives for Unix: chmod, chown, mode, symlinks.
//!
//! chmod and the symlink calls have two bindings, chained by
//! [`FallbackChain`]:
//!
//! - [`LibcFiles`]: libc entry points resolved with `dlsym` on first use
//! - [`PosixFiles`]: std/nix wrappers, linked at build time
//!
//! chown and mode have a single binding.

use std::ffi::{c_char, c_int, CString};
use std::io;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use nix::errno::Errno;
use nix::unistd::{Gid, Uid};

use osprobe_core::error::{NativeError, NativeResult};
use osprobe_core::fallback::{FallbackChain, FileBinding};
use osprobe_core::kprint::Logger;
use osprobe_core::query::{read_growing, GrowRead};
use osprobe_core::kdebug;

use crate::config::SupportConfig;
use crate::dl::Library;

/// The chain every Unix binding uses.
pub type UnixFiles = FallbackChain<LibcFiles, PosixFiles>;

pub fn unix_files(config: &SupportConfig) -> UnixFiles {
    FallbackChain::new(
        LibcFiles::new(config.link_min_buf, config.link_max_buf, config.log),
        PosixFiles,
        config.log,
    )
}

type ChmodFn = unsafe extern "C" fn(*const c_char, libc::mode_t) -> c_int;
type SymlinkFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;
type ReadlinkFn = unsafe extern "C" fn(*const c_char, *mut c_char, libc::size_t) -> libc::ssize_t;

struct Symbols {
    chmod: ChmodFn,
    symlink: SymlinkFn,
    readlink: ReadlinkFn,
    // Keeps the function pointers above valid.
    _lib: Library,
}

impl Symbols {
    fn resolve(lib: Library) -> NativeResult<Self> {
        unsafe {
            Ok(Self {
                chmod: lib.symbol("chmod")?,
                symlink: lib.symbol("symlink")?,
                readlink: lib.symbol("readlink")?,
                _lib: lib,
            })
        }
    }
}

/// Where `LibcFiles` finds its symbols.
#[derive(Debug, Clone)]
enum SymbolScope {
    Process,
    Library(String),
}

/// libc chmod/symlink/readlink resolved at first use.
///
/// Resolution happens once; a failure is remembered and reported as
/// `NativeError::Linkage` on every call.
pub struct LibcFiles {
    scope: SymbolScope,
    symbols: OnceLock<Result<Symbols, (String, String)>>,
    min_buf: usize,
    max_buf: usize,
    log: Logger,
}

impl LibcFiles {
    /// Bind against the running process's libc.
    pub fn new(min_buf: usize, max_buf: usize, log: Logger) -> Self {
        Self {
            scope: SymbolScope::Process,
            symbols: OnceLock::new(),
            min_buf,
            max_buf,
            log,
        }
    }

    /// Bind against a specific shared object instead.
    pub fn from_library(name: impl Into<String>, min_buf: usize, max_buf: usize, log: Logger) -> Self {
        Self {
            scope: SymbolScope::Library(name.into()),
            ..Self::new(min_buf, max_buf, log)
        }
    }

    fn symbols(&self) -> NativeResult<&Symbols> {
        let resolved = self.symbols.get_or_init(|| {
            let lib = match &self.scope {
                SymbolScope::Process => Library::this_process(),
                SymbolScope::Library(name) => Library::open(name),
            };
            match lib.and_then(Symbols::resolve) {
                Ok(s) => Ok(s),
                Err(NativeError::Linkage { symbol, reason }) => {
                    kdebug!(self.log, "libc file symbols unavailable: {}: {}", symbol, reason);
                    Err((symbol, reason))
                }
                Err(other) => Err(("libc".to_string(), other.to_string())),
            }
        });
        match resolved {
            Ok(s) => Ok(s),
            Err((symbol, reason)) => Err(NativeError::linkage(symbol.clone(), reason.clone())),
        }
    }
}

impl FileBinding for LibcFiles {
    fn name(&self) -> &'static str {
        "libc"
    }

    fn chmod(&self, path: &Path, mode: u32) -> NativeResult<()> {
        let sym = self.symbols()?;
        let c = c_path(path)?;
        let rc = unsafe { (sym.chmod)(c.as_ptr(), mode as libc::mode_t) };
        if rc != 0 {
            return Err(errno_err("chmod", Errno::last()));
        }
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> NativeResult<()> {
        let sym = self.symbols()?;
        let t = c_path(target)?;
        let l = c_path(link)?;
        let rc = unsafe { (sym.symlink)(t.as_ptr(), l.as_ptr()) };
        if rc != 0 {
            return Err(errno_err("symlink", Errno::last()));
        }
        Ok(())
    }

    fn readlink(&self, link: &Path) -> NativeResult<Option<PathBuf>> {
        let sym = self.symbols()?;
        let c = c_path(link)?;
        let what = link.display().to_string();
        let bytes = read_growing(&what, self.min_buf, self.max_buf, |buf| {
            let n = unsafe { (sym.readlink)(c.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(GrowRead::Filled(n as usize));
            }
            match Errno::last() {
                Errno::EINVAL => Ok(GrowRead::Absent),
                e => Err(errno_err("readlink", e)),
            }
        })?;
        Ok(bytes.map(|b| PathBuf::from(std::ffi::OsString::from_vec(b))))
    }
}

/// std/nix file calls; always linked.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixFiles;

impl FileBinding for PosixFiles {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn chmod(&self, path: &Path, mode: u32) -> NativeResult<()> {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| io_err("chmod", e))
    }

    fn symlink(&self, target: &Path, link: &Path) -> NativeResult<()> {
        std::os::unix::fs::symlink(target, link).map_err(|e| io_err("symlink", e))
    }

    fn readlink(&self, link: &Path) -> NativeResult<Option<PathBuf>> {
        match nix::fcntl::readlink(link) {
            Ok(target) => Ok(Some(PathBuf::from(target))),
            Err(Errno::EINVAL) => Ok(None),
            Err(e) => Err(errno_err("readlink", e)),
        }
    }
}

pub fn chown(path: &Path, uid: u32, gid: u32) -> NativeResult<()> {
    nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
        .map_err(|e| errno_err("chown", e))
}

/// Full `st_mode`, file type bits included.
pub fn mode(path: &Path) -> NativeResult<u32> {
    let st = nix::sys::stat::stat(path).map_err(|e| errno_err("stat", e))?;
    Ok(st.st_mode as u32)
}

/// Add owner write permission (u+w).
pub fn make_writable<B: FileBinding>(files: &B, path: &Path) -> NativeResult<()> {
    let current = mode(path)?;
    files.chmod(path, (current | 0o200) & 0o7777)
}

pub(crate) fn errno_err(op: &'static str, e: Errno) -> NativeError {
    NativeError::os(op, e as i32)
}

pub(crate) fn io_err(op: &'static str, e: io::Error) -> NativeError {
    match e.raw_os_error() {
        Some(code) => NativeError::os(op, code),
        None => NativeError::Os {
            op,
            code: 0,
            message: e.to_string(),
        },
    }
}

fn c_path(path: &Path) -> NativeResult<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| NativeError::InvalidInput(format!("path contains NUL: {}", path.display())))
}
