//! Darwin `sysctl(3)` as a [`KernelQuery`].

use std::ffi::{c_int, c_uint};
use std::ptr;

use nix::errno::Errno;

use osprobe_core::query::{KernelQuery, QueryError, QueryKey};

const CTL_KERN: c_int = 1;
const KERN_PROC: c_int = 14;
const KERN_PROC_ALL: c_int = 0;
const KERN_PROCARGS2: c_int = 49;

#[derive(Debug, Default, Clone, Copy)]
pub struct SysctlQuery;

impl SysctlQuery {
    fn mib(key: QueryKey) -> Vec<c_int> {
        match key {
            QueryKey::AllProcesses => vec![CTL_KERN, KERN_PROC, KERN_PROC_ALL],
            QueryKey::ProcessArguments(pid) => vec![CTL_KERN, KERN_PROCARGS2, pid],
        }
    }

    fn call(key: QueryKey, buf: *mut u8, len: &mut libc::size_t) -> Result<(), QueryError> {
        let mut mib = Self::mib(key);
        let rc = unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                mib.len() as c_uint,
                buf.cast(),
                len,
                ptr::null_mut(),
                0,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        match Errno::last() {
            Errno::ENOMEM => Err(QueryError::Undersized),
            e => Err(QueryError::Os(e as i32)),
        }
    }
}

impl KernelQuery for SysctlQuery {
    fn required_size(&self, key: QueryKey) -> Result<usize, QueryError> {
        let mut len: libc::size_t = 0;
        Self::call(key, ptr::null_mut(), &mut len)?;
        Ok(len)
    }

    fn fetch(&self, key: QueryKey, buf: &mut [u8]) -> Result<usize, QueryError> {
        let mut len: libc::size_t = buf.len();
        Self::call(key, buf.as_mut_ptr(), &mut len)?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osprobe_core::query::SizedQuery;
    use osprobe_core::Logger;

    #[test]
    fn process_table_is_nonempty() {
        let buf = SizedQuery::new(Logger::silent())
            .run(&SysctlQuery, QueryKey::AllProcesses)
            .unwrap();
        assert!(!buf.is_empty());
    }

    #[test]
    fn own_arguments_decode() {
        let pid = std::process::id() as i32;
        let blob = SizedQuery::new(Logger::silent())
            .slack(1)
            .run(&SysctlQuery, QueryKey::ProcessArguments(pid))
            .unwrap();
        let args = osprobe_core::procargs::decode(&blob).unwrap();
        assert!(!args.arguments.is_empty());
    }
}
