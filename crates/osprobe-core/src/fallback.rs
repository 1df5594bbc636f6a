//! Fallback chain for file primitives.
//!
//! chmod and symlink creation/resolution each have two bindings: a fast
//! native one whose symbols are resolved at first use, and a portable one.
//! `FallbackChain` tries the primary and switches to the secondary only
//! when the primary reports `NativeError::Linkage`. A runtime error from a
//! linked primary (EPERM, ENOENT, ...) is returned unchanged: the
//! secondary would reject the same call.

use std::path::{Path, PathBuf};

use crate::error::NativeResult;
use crate::kinfo;
use crate::kprint::Logger;

/// One implementation of the file primitives that may fail to link.
pub trait FileBinding: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    fn chmod(&self, path: &Path, mode: u32) -> NativeResult<()>;

    /// Create `link` pointing at `target`.
    fn symlink(&self, target: &Path, link: &Path) -> NativeResult<()>;

    /// Target of `link`, or `None` if `link` is not a symlink.
    fn readlink(&self, link: &Path) -> NativeResult<Option<PathBuf>>;
}

/// Primary binding with a secondary used on linkage failure.
pub struct FallbackChain<P, S> {
    primary: P,
    secondary: S,
    log: Logger,
}

impl<P: FileBinding, S: FileBinding> FallbackChain<P, S> {
    pub fn new(primary: P, secondary: S, log: Logger) -> Self {
        Self {
            primary,
            secondary,
            log,
        }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn secondary(&self) -> &S {
        &self.secondary
    }

    fn route<T>(
        &self,
        op: &str,
        on_primary: impl FnOnce(&P) -> NativeResult<T>,
        on_secondary: impl FnOnce(&S) -> NativeResult<T>,
    ) -> NativeResult<T> {
        match on_primary(&self.primary) {
            Err(e) if e.is_linkage() => {
                kinfo!(
                    self.log,
                    "{} via {} unavailable ({}); trying {}",
                    op,
                    self.primary.name(),
                    e,
                    self.secondary.name()
                );
                on_secondary(&self.secondary)
            }
            other => other,
        }
    }
}

impl<P: FileBinding, S: FileBinding> FileBinding for FallbackChain<P, S> {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    fn chmod(&self, path: &Path, mode: u32) -> NativeResult<()> {
        self.route("chmod", |p| p.chmod(path, mode), |s| s.chmod(path, mode))
    }

    fn symlink(&self, target: &Path, link: &Path) -> NativeResult<()> {
        self.route("symlink", |p| p.symlink(target, link), |s| s.symlink(target, link))
    }

    fn readlink(&self, link: &Path) -> NativeResult<Option<PathBuf>> {
        self.route("readlink", |p| p.readlink(link), |s| s.readlink(link))
    }
}
