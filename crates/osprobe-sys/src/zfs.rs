//! Optional ZFS support through a runtime-loaded libzfs.

use std::ffi::{c_char, c_int, c_void, CString};
use std::sync::Mutex;

use osprobe_core::error::{NativeError, NativeResult};
use osprobe_core::kprint::Logger;
use osprobe_core::{kdebug, kinfo};

use crate::config::SupportConfig;
use crate::dl::Library;

/// `ZFS_TYPE_FILESYSTEM`
const ZFS_TYPE_FILESYSTEM: c_int = 1;

type InitFn = unsafe extern "C" fn() -> *mut c_void;
type FiniFn = unsafe extern "C" fn(*mut c_void);
type ExistsFn = unsafe extern "C" fn(*mut c_void, *const c_char, c_int) -> c_int;

cfg_if::cfg_if! {
    if #[cfg(target_vendor = "apple")] {
        const LIBRARY_NAMES: &[&str] = &["libzfs.4.dylib", "libzfs.dylib"];
    } else {
        const LIBRARY_NAMES: &[&str] = &[
            "libzfs.so.6",
            "libzfs.so.4",
            "libzfs.so.2",
            "libzfs.so.1",
            "libzfs.so",
        ];
    }
}

struct Handle(*mut c_void);

// libzfs handles are not thread-safe; every use goes through the Mutex.
unsafe impl Send for Handle {}

pub struct ZfsSupport {
    handle: Mutex<Handle>,
    exists: ExistsFn,
    fini: FiniFn,
    log: Logger,
    _lib: Library,
}

impl ZfsSupport {
    /// Load libzfs and open a handle. Any failure means no ZFS.
    pub fn load(config: &SupportConfig) -> NativeResult<Self> {
        let lib = match &config.zfs_library {
            Some(name) => Library::open(name)?,
            None => Library::open_first(LIBRARY_NAMES)?,
        };
        let (init, fini, exists) = unsafe {
            (
                lib.symbol::<InitFn>("libzfs_init")?,
                lib.symbol::<FiniFn>("libzfs_fini")?,
                lib.symbol::<ExistsFn>("zfs_dataset_exists")?,
            )
        };
        // Fails without /dev/zfs (module not loaded, no permission).
        let handle = unsafe { init() };
        if handle.is_null() {
            return Err(NativeError::linkage("libzfs_init", "returned no handle"));
        }
        kinfo!(config.log, "ZFS support loaded from {}", lib.name());
        Ok(Self {
            handle: Mutex::new(Handle(handle)),
            exists,
            fini,
            log: config.log.tag("zfs"),
            _lib: lib,
        })
    }

    /// True if a ZFS filesystem named `name` (e.g. `rpool/home`) exists.
    pub fn exists(&self, name: &str) -> NativeResult<bool> {
        let c_name = CString::new(name)
            .map_err(|_| NativeError::InvalidInput(format!("dataset name {:?}", name)))?;
        let guard = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        let found = unsafe { (self.exists)(guard.0, c_name.as_ptr(), ZFS_TYPE_FILESYSTEM) } != 0;
        kdebug!(self.log, "zfs dataset {} exists: {}", name, found);
        Ok(found)
    }
}

impl Drop for ZfsSupport {
    fn drop(&mut self) {
        let handle = self.handle.get_mut().unwrap_or_else(|p| p.into_inner());
        if !handle.0.is_null() {
            unsafe { (self.fini)(handle.0) };
            handle.0 = std::ptr::null_mut();
        }
    }
}
