//! Identity lookups: effective ids, user and group database.

use std::ffi::CString;

use nix::unistd::{Gid, Group, Uid, User};

use osprobe_core::error::{NativeError, NativeResult};

use crate::files::errno_err;

pub fn euid() -> u32 {
    Uid::effective().as_raw()
}

pub fn egid() -> u32 {
    Gid::effective().as_raw()
}

/// Login name of the effective user.
pub fn process_user() -> NativeResult<String> {
    let uid = Uid::effective();
    match User::from_uid(uid).map_err(|e| errno_err("getpwuid", e))? {
        Some(user) => Ok(user.name),
        None => Err(NativeError::InvalidInput(format!("uid {} has no passwd entry", uid))),
    }
}

pub fn user_name(uid: u32) -> Option<String> {
    User::from_uid(Uid::from_raw(uid)).ok().flatten().map(|u| u.name)
}

pub fn group_name(gid: u32) -> Option<String> {
    Group::from_gid(Gid::from_raw(gid)).ok().flatten().map(|g| g.name)
}

pub fn check_unix_user(name: &str) -> NativeResult<bool> {
    Ok(User::from_name(name)
        .map_err(|e| errno_err("getpwnam", e))?
        .is_some())
}

pub fn check_unix_group(name: &str) -> NativeResult<bool> {
    Ok(Group::from_name(name)
        .map_err(|e| errno_err("getgrnam", e))?
        .is_some())
}

/// Names of every group `user` belongs to, primary group first.
/// Gids without a group entry are reported numerically.
pub fn groups_of(user: &str) -> NativeResult<Vec<String>> {
    let entry = User::from_name(user)
        .map_err(|e| errno_err("getpwnam", e))?
        .ok_or_else(|| NativeError::InvalidInput(format!("unknown user {}", user)))?;
    let c_user = CString::new(user)
        .map_err(|_| NativeError::InvalidInput(format!("user name {:?}", user)))?;
    let gids = group_list(&c_user, entry.gid)?;

    let mut names: Vec<String> = Vec::with_capacity(gids.len());
    for gid in gids {
        let name = group_name(gid.as_raw()).unwrap_or_else(|| gid.to_string());
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

cfg_if::cfg_if! {
    if #[cfg(target_vendor = "apple")] {
        fn group_list(user: &std::ffi::CStr, base: Gid) -> NativeResult<Vec<Gid>> {
            // Darwin's getgrouplist takes int gids and caps lists at NGROUPS_MAX.
            let mut len: libc::c_int = 64;
            loop {
                let mut buf = vec![0 as libc::c_int; len as usize];
                let before = len;
                let rc = unsafe {
                    libc::getgrouplist(
                        user.as_ptr(),
                        base.as_raw() as libc::c_int,
                        buf.as_mut_ptr(),
                        &mut len,
                    )
                };
                if rc == 0 {
                    buf.truncate(len as usize);
                    return Ok(buf.into_iter().map(|g| Gid::from_raw(g as libc::gid_t)).collect());
                }
                if before >= 1024 {
                    return Err(NativeError::os("getgrouplist", libc::ERANGE));
                }
                len = before * 2;
            }
        }
    } else {
        fn group_list(user: &std::ffi::CStr, base: Gid) -> NativeResult<Vec<Gid>> {
            nix::unistd::getgrouplist(user, base).map_err(|e| errno_err("getgrouplist", e))
        }
    }
}
