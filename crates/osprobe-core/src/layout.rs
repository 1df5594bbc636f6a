//! Process-table record layouts.
//!
//! `KERN_PROC_ALL` returns an array of `struct kinfo_proc`. We only need
//! two `i32` fields out of each record, so instead of mirroring the whole
//! struct we keep (stride, pid offset, ppid offset) per {platform, word
//! width}. These are kernel ABI constants observed on shipping releases,
//! not a documented interface. A wrong stride yields garbage pids rather
//! than an error, which is why layouts are validated when a binding is
//! built and pinned by the tests below.

use crate::error::{NativeError, NativeResult};
use crate::platform::{Platform, WordWidth};
use crate::process::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcTableLayout {
    /// Size of one record in bytes.
    pub stride: usize,
    /// Offset of `kp_proc.p_pid`.
    pub pid_offset: usize,
    /// Offset of `kp_eproc.e_ppid`.
    pub ppid_offset: usize,
}

/// 32-bit Darwin `kinfo_proc`.
pub const DARWIN_32: ProcTableLayout = ProcTableLayout {
    stride: 492,
    pid_offset: 24,
    ppid_offset: 416,
};

/// 64-bit Darwin `kinfo_proc`.
pub const DARWIN_64: ProcTableLayout = ProcTableLayout {
    stride: 648,
    pid_offset: 40,
    ppid_offset: 560,
};

const PID_SIZE: usize = core::mem::size_of::<Pid>();

impl ProcTableLayout {
    /// Layout for a {platform, width} pair, if the platform exposes a
    /// fixed-stride process table.
    pub fn lookup(platform: Platform, width: WordWidth) -> Option<Self> {
        match (platform, width) {
            (Platform::MacOs, WordWidth::Bits32) => Some(DARWIN_32),
            (Platform::MacOs, WordWidth::Bits64) => Some(DARWIN_64),
            _ => None,
        }
    }

    /// Both fields must lie inside one record and must not overlap.
    pub fn validate(&self) -> NativeResult<()> {
        if self.stride == 0 {
            return Err(NativeError::Malformed("zero record stride"));
        }
        if self.pid_offset + PID_SIZE > self.stride || self.ppid_offset + PID_SIZE > self.stride {
            return Err(NativeError::Malformed("field offset outside record"));
        }
        if self.pid_offset.abs_diff(self.ppid_offset) < PID_SIZE {
            return Err(NativeError::Malformed("pid and ppid fields overlap"));
        }
        Ok(())
    }

    /// Whole records contained in a buffer of `len` bytes.
    #[inline]
    pub fn record_count(&self, len: usize) -> usize {
        len / self.stride
    }

    /// (pid, ppid) for every whole record, in buffer order. A trailing
    /// partial record is ignored.
    pub fn records<'a>(&self, buf: &'a [u8]) -> impl Iterator<Item = (Pid, Pid)> + 'a {
        let layout = *self;
        buf.chunks_exact(layout.stride)
            .map(move |rec| (read_pid(rec, layout.pid_offset), read_pid(rec, layout.ppid_offset)))
    }
}

#[inline]
fn read_pid(rec: &[u8], offset: usize) -> Pid {
    let mut raw = [0u8; PID_SIZE];
    raw.copy_from_slice(&rec[offset..offset + PID_SIZE]);
    Pid::from_ne_bytes(raw)
}
