//! Runtime linking through `dlopen`/`dlsym`.
//!
//! Native bindings resolve their symbols at first use instead of at
//! process load, so a missing library or symbol becomes a
//! `NativeError::Linkage` the caller can act on (fall back, or report the
//! capability as absent) rather than a loader abort.

use std::ffi::{c_void, CStr, CString};
use std::mem;

use osprobe_core::error::{NativeError, NativeResult};

/// An open `dlopen` handle. Closed on drop.
pub struct Library {
    handle: *mut c_void,
    name: String,
}

// The handle is only passed back to dlsym/dlclose, both thread-safe.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Open a shared object by path or soname.
    pub fn open(name: &str) -> NativeResult<Self> {
        let c_name = CString::new(name)
            .map_err(|_| NativeError::InvalidInput(format!("library name {:?}", name)))?;
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(NativeError::linkage(name, dl_error()));
        }
        Ok(Self {
            handle,
            name: name.to_string(),
        })
    }

    /// Open the first loadable candidate. The error names every attempt.
    pub fn open_first<S: AsRef<str>>(candidates: &[S]) -> NativeResult<Self> {
        let mut reasons = Vec::with_capacity(candidates.len());
        for name in candidates {
            match Self::open(name.as_ref()) {
                Ok(lib) => return Ok(lib),
                Err(e) => reasons.push(e.to_string()),
            }
        }
        let names: Vec<&str> = candidates.iter().map(|s| s.as_ref()).collect();
        Err(NativeError::linkage(names.join("|"), reasons.join("; ")))
    }

    /// The global symbol scope of the running process (libc included).
    pub fn this_process() -> NativeResult<Self> {
        let handle = unsafe { libc::dlopen(std::ptr::null(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(NativeError::linkage("<self>", dl_error()));
        }
        Ok(Self {
            handle,
            name: "<self>".to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve `symbol` as a value of type `T` (a function pointer).
    ///
    /// # Safety
    ///
    /// `T` must be a pointer-sized type matching the symbol's real
    /// signature. The returned value must not outlive `self`.
    pub unsafe fn symbol<T: Copy>(&self, symbol: &str) -> NativeResult<T> {
        if mem::size_of::<T>() != mem::size_of::<*mut c_void>() {
            return Err(NativeError::InvalidInput(format!(
                "{}: symbol type is not pointer-sized",
                symbol
            )));
        }
        let c_sym = CString::new(symbol)
            .map_err(|_| NativeError::InvalidInput(format!("symbol name {:?}", symbol)))?;
        // Clear stale state so a NULL result can be told apart from an error.
        libc::dlerror();
        let ptr = libc::dlsym(self.handle, c_sym.as_ptr());
        if ptr.is_null() {
            return Err(NativeError::linkage(
                format!("{}:{}", self.name, symbol),
                dl_error(),
            ));
        }
        Ok(mem::transmute_copy::<*mut c_void, T>(&ptr))
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("name", &self.name).finish()
    }
}

fn dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dynamic linker error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_char;

    type StrlenFn = unsafe extern "C" fn(*const c_char) -> libc::size_t;

    #[test]
    fn resolves_libc_from_process_scope() {
        let lib = Library::this_process().unwrap();
        let strlen: StrlenFn = unsafe { lib.symbol("strlen") }.unwrap();
        let s = CString::new("osprobe").unwrap();
        assert_eq!(unsafe { strlen(s.as_ptr()) }, 7);
    }

    #[test]
    fn missing_symbol_is_linkage_error() {
        let lib = Library::this_process().unwrap();
        let err = unsafe { lib.symbol::<StrlenFn>("osprobe_no_such_symbol_xyz") }.unwrap_err();
        assert!(err.is_linkage());
        assert!(err.to_string().contains("osprobe_no_such_symbol_xyz"));
    }

    #[test]
    fn missing_library_is_linkage_error() {
        let err = Library::open_first(&["libosprobe-missing-a.so", "libosprobe-missing-b.so"])
            .unwrap_err();
        assert!(err.is_linkage());
        let text = err.to_string();
        assert!(text.contains("libosprobe-missing-a.so"));
        assert!(text.contains("libosprobe-missing-b.so"));
    }
}
