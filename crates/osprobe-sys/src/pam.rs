//! PAM authentication against a runtime-loaded libpam.
//!
//! libpam is opened with `dlopen` when the binding is built. If it cannot
//! be loaded the PAM capability is simply absent.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::path::Path;
use std::ptr;

use nix::unistd::{access, AccessFlags};

use osprobe_core::error::{NativeError, NativeResult};
use osprobe_core::kprint::Logger;
use osprobe_core::{kdebug, kinfo};

use crate::config::SupportConfig;
use crate::dl::Library;
use crate::files::errno_err;
use crate::user;

const PAM_SUCCESS: c_int = 0;
const PAM_BUF_ERR: c_int = 5;
const PAM_PROMPT_ECHO_OFF: c_int = 1;
const PAM_PROMPT_ECHO_ON: c_int = 2;

#[allow(dead_code)]
#[repr(C)]
struct PamMessage {
    msg_style: c_int,
    msg: *const c_char,
}

#[allow(dead_code)]
#[repr(C)]
struct PamResponse {
    resp: *mut c_char,
    resp_retcode: c_int,
}

type ConvFn = unsafe extern "C" fn(
    c_int,
    *mut *const PamMessage,
    *mut *mut PamResponse,
    *mut c_void,
) -> c_int;

#[repr(C)]
struct PamConv {
    conv: ConvFn,
    appdata_ptr: *mut c_void,
}

type PamHandle = c_void;
type StartFn = unsafe extern "C" fn(*const c_char, *const c_char, *const PamConv, *mut *mut PamHandle) -> c_int;
type HandleFn = unsafe extern "C" fn(*mut PamHandle, c_int) -> c_int;
type StrerrorFn = unsafe extern "C" fn(*mut PamHandle, c_int) -> *const c_char;

cfg_if::cfg_if! {
    if #[cfg(target_vendor = "apple")] {
        const LIBRARY_NAMES: &[&str] = &["libpam.2.dylib", "libpam.dylib"];
    } else if #[cfg(target_os = "linux")] {
        const LIBRARY_NAMES: &[&str] = &["libpam.so.0", "libpam.so"];
    } else {
        const LIBRARY_NAMES: &[&str] = &["libpam.so", "libpam.so.1"];
    }
}

/// Password bytes, wiped on drop.
struct Secret(CString);

impl Drop for Secret {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes_with_nul();
        for b in bytes.iter_mut() {
            unsafe { ptr::write_volatile(b, 0) };
        }
    }
}

/// Answers every prompt with the password.
///
/// Uses the Linux-PAM layout where `msg` is an array of pointers. Solaris
/// passes a pointer to an array of messages instead.
unsafe extern "C" fn converse(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata: *mut c_void,
) -> c_int {
    if num_msg <= 0 || msg.is_null() || resp.is_null() || appdata.is_null() {
        return PAM_BUF_ERR;
    }
    let n = num_msg as usize;
    // libpam frees the array and each resp string with free().
    let replies = libc::calloc(n, std::mem::size_of::<PamResponse>()) as *mut PamResponse;
    if replies.is_null() {
        return PAM_BUF_ERR;
    }
    let password = &*(appdata as *const Secret);
    for i in 0..n {
        let m = *msg.add(i);
        if m.is_null() {
            continue;
        }
        match (*m).msg_style {
            PAM_PROMPT_ECHO_OFF | PAM_PROMPT_ECHO_ON => {
                (*replies.add(i)).resp = libc::strdup(password.0.as_ptr());
            }
            _ => {}
        }
    }
    *resp = replies;
    PAM_SUCCESS
}

/// Loaded libpam entry points.
pub struct PamSupport {
    start: StartFn,
    authenticate: HandleFn,
    acct_mgmt: HandleFn,
    end: HandleFn,
    strerror: StrerrorFn,
    default_service: String,
    log: Logger,
    _lib: Library,
}

impl PamSupport {
    pub fn load(config: &SupportConfig) -> NativeResult<Self> {
        let lib = match &config.pam_library {
            Some(name) => Library::open(name)?,
            None => Library::open_first(LIBRARY_NAMES)?,
        };
        let pam = unsafe {
            Self {
                start: lib.symbol("pam_start")?,
                authenticate: lib.symbol("pam_authenticate")?,
                acct_mgmt: lib.symbol("pam_acct_mgmt")?,
                end: lib.symbol("pam_end")?,
                strerror: lib.symbol("pam_strerror")?,
                default_service: config.pam_service.clone(),
                log: config.log.tag("pam"),
                _lib: lib,
            }
        };
        kdebug!(pam.log, "libpam loaded from {}", pam._lib.name());
        Ok(pam)
    }

    pub fn default_service(&self) -> &str {
        &self.default_service
    }

    /// Authenticate `user` with `password` and check the account.
    /// Returns the user's group names.
    pub fn authenticate(&self, service: Option<&str>, user: &str, password: &str) -> NativeResult<Vec<String>> {
        let service = service.unwrap_or(&self.default_service);
        let c_service = cstring("service", service)?;
        let c_user = cstring("user", user)?;
        let secret = Secret(cstring("password", password)?);

        let conv = PamConv {
            conv: converse,
            appdata_ptr: &secret as *const Secret as *mut c_void,
        };
        let mut handle: *mut PamHandle = ptr::null_mut();
        let rc = unsafe { (self.start)(c_service.as_ptr(), c_user.as_ptr(), &conv, &mut handle) };
        if rc != PAM_SUCCESS {
            return Err(self.failure(service, ptr::null_mut(), rc));
        }

        let mut rc = unsafe { (self.authenticate)(handle, 0) };
        if rc == PAM_SUCCESS {
            rc = unsafe { (self.acct_mgmt)(handle, 0) };
        }
        let result = if rc == PAM_SUCCESS {
            Ok(())
        } else {
            Err(self.failure(service, handle, rc))
        };
        unsafe { (self.end)(handle, rc) };
        drop(secret);
        result?;

        kinfo!(self.log, "PAM({}) authenticated {}", service, user);
        user::groups_of(user)
    }

    fn failure(&self, service: &str, handle: *mut PamHandle, rc: c_int) -> NativeError {
        let msg = unsafe { (self.strerror)(handle, rc) };
        let message = if msg.is_null() {
            format!("PAM error {}", rc)
        } else {
            unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
        };
        NativeError::Authentication {
            service: service.to_string(),
            message,
        }
    }
}

fn cstring(what: &str, s: &str) -> NativeResult<CString> {
    CString::new(s).map_err(|_| NativeError::InvalidInput(format!("{} contains NUL", what)))
}

pub const SHADOW_PATH: &str = "/etc/shadow";

/// Whether this process can use PAM with shadow passwords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PamSetup {
    Ready,
    /// The shadow file exists but this process cannot read it.
    ShadowUnreadable {
        /// Effective user, if it has a passwd entry
        user: Option<String>,
        /// Group owning the shadow file (name, or numeric gid)
        group: String,
        /// Owner of the shadow file, if it has a passwd entry
        owner: Option<String>,
        /// Shadow file is group readable
        group_readable: bool,
    },
}

impl PamSetup {
    pub fn is_ready(&self) -> bool {
        matches!(self, PamSetup::Ready)
    }
}

impl fmt::Display for PamSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PamSetup::Ready => f.write_str("PAM setup ok"),
            PamSetup::ShadowUnreadable {
                user,
                group,
                owner,
                group_readable,
            } => {
                let user = user.as_deref().unwrap_or("the current user");
                if *group_readable {
                    write!(f, "{} needs to belong to group {} to read {}", user, group, SHADOW_PATH)
                } else {
                    let owner = owner.as_deref().unwrap_or("its owner");
                    write!(
                        f,
                        "either run as {}, or add {} to group {} and run 'chmod g+r {}'",
                        owner, user, group, SHADOW_PATH
                    )
                }
            }
        }
    }
}

pub fn check_pam_setup() -> NativeResult<PamSetup> {
    check_shadow(Path::new(SHADOW_PATH))
}

pub fn check_shadow(shadow: &Path) -> NativeResult<PamSetup> {
    if !shadow.exists() || access(shadow, AccessFlags::R_OK).is_ok() {
        return Ok(PamSetup::Ready);
    }
    let st = nix::sys::stat::stat(shadow).map_err(|e| errno_err("stat", e))?;
    Ok(PamSetup::ShadowUnreadable {
        user: user::user_name(user::euid()),
        group: user::group_name(st.st_gid).unwrap_or_else(|| st.st_gid.to_string()),
        owner: user::user_name(st.st_uid),
        group_readable: (st.st_mode as u32) & 0o040 != 0,
    })
}
