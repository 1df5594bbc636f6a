//! Windows process listing.
//!
//! Processes come from a Toolhelp snapshot. Toolhelp reports no usable
//! parent (the recorded id may have been reused), so every descriptor has
//! `ppid() == None`. Arguments and environment are read from the target's
//! PEB: command line and image path from `RTL_USER_PROCESS_PARAMETERS`, the
//! environment block from the pointer stored right after it. Opening the
//! process fails for protected and other users' processes; those decode as
//! empty.
//!
//! The text helpers below are platform-independent.

use std::collections::HashMap;
use std::iter;

use osprobe_core::procargs::split_env_entry;

/// Split a command line the way the MSVC runtime builds `argv`.
///
/// Space and tab separate arguments outside quotes. `2n` backslashes
/// before a quote give `n` backslashes and toggle quoting; `2n + 1` give
/// `n` backslashes and a literal quote. Other backslashes are literal. A
/// doubled quote inside quotes is a literal quote.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut cur = String::new();
    let mut in_arg = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' if !quoted => {
                if in_arg {
                    args.push(std::mem::take(&mut cur));
                    in_arg = false;
                }
            }
            '\\' => {
                let mut n = 1;
                while chars.peek() == Some(&'\\') {
                    chars.next();
                    n += 1;
                }
                in_arg = true;
                if chars.peek() == Some(&'"') {
                    cur.extend(iter::repeat('\\').take(n / 2));
                    if n % 2 == 1 {
                        chars.next();
                        cur.push('"');
                    }
                } else {
                    cur.extend(iter::repeat('\\').take(n));
                }
            }
            '"' => {
                in_arg = true;
                if quoted && chars.peek() == Some(&'"') {
                    chars.next();
                    cur.push('"');
                } else {
                    quoted = !quoted;
                }
            }
            _ => {
                in_arg = true;
                cur.push(c);
            }
        }
    }
    if in_arg {
        args.push(cur);
    }
    args
}

/// Parse a UTF-16 environment block: `KEY=value` entries, each NUL
/// terminated, the block ending at an empty entry. Per-drive entries
/// (`=C:=C:\dir`) have no key and are dropped.
pub fn parse_env_block(block: &[u16]) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for entry in block.split(|&u| u == 0) {
        if entry.is_empty() {
            break;
        }
        let entry = String::from_utf16_lossy(entry);
        if let Some((k, v)) = split_env_entry(&entry) {
            env.insert(k.to_string(), v.to_string());
        }
    }
    env
}

#[cfg(windows)]
pub use self::os::{PebArguments, Toolhelp};

#[cfg(windows)]
mod os {
    use std::ffi::c_void;
    use std::mem::{self, MaybeUninit};
    use std::ptr;
    use std::slice;
    use std::sync::Arc;

    use osprobe_core::error::{NativeError, NativeResult};
    use osprobe_core::kprint::Logger;
    use osprobe_core::kwarn;
    use osprobe_core::procargs::ProcessArgs;
    use osprobe_core::process::{ArgumentSource, Pid, ProcessDescriptor};
    use windows_sys::Wdk::System::Threading::{NtQueryInformationProcess, ProcessBasicInformation};
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE, UNICODE_STRING};
    use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };
    use windows_sys::Win32::System::Memory::{VirtualQueryEx, MEMORY_BASIC_INFORMATION};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PEB, PROCESS_BASIC_INFORMATION, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
        RTL_USER_PROCESS_PARAMETERS,
    };

    use super::{parse_env_block, split_command_line};
    use crate::binding::ProcessEnumerator;

    /// Largest environment block read from another process.
    const ENV_BLOCK_MAX: usize = 1 << 20;

    /// Closed on drop.
    struct Handle(HANDLE);

    impl Handle {
        fn new(raw: HANDLE) -> Option<Self> {
            (raw != 0 && raw != INVALID_HANDLE_VALUE).then_some(Self(raw))
        }
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    /// Enumerates processes through `CreateToolhelp32Snapshot`.
    pub struct Toolhelp {
        source: Arc<dyn ArgumentSource>,
        log: Logger,
    }

    impl Toolhelp {
        pub fn new(log: Logger) -> Self {
            Self {
                source: Arc::new(PebArguments),
                log,
            }
        }

        /// One descriptor per snapshot entry, in snapshot order.
        pub fn snapshot(&self) -> NativeResult<Vec<ProcessDescriptor>> {
            let snap = Handle::new(unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) })
                .ok_or_else(|| NativeError::last_os("CreateToolhelp32Snapshot"))?;

            let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
            entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

            let mut out = Vec::new();
            let mut more = unsafe { Process32FirstW(snap.0, &mut entry) } != 0;
            while more {
                out.push(ProcessDescriptor::new(
                    entry.th32ProcessID as Pid,
                    None,
                    Arc::clone(&self.source),
                    self.log,
                ));
                more = unsafe { Process32NextW(snap.0, &mut entry) } != 0;
            }
            Ok(out)
        }
    }

    impl ProcessEnumerator for Toolhelp {
        fn processes(&self) -> Vec<ProcessDescriptor> {
            match self.snapshot() {
                Ok(procs) => procs,
                Err(e) => {
                    kwarn!(self.log, "process snapshot failed: {}", e);
                    Vec::new()
                }
            }
        }
    }

    /// Reads command line, image path and environment from a process's PEB.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct PebArguments;

    impl ArgumentSource for PebArguments {
        fn load(&self, pid: Pid) -> NativeResult<ProcessArgs> {
            let process = Handle::new(unsafe {
                OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, 0, pid as u32)
            })
            .ok_or_else(|| NativeError::last_os("OpenProcess"))?;

            let mut info: PROCESS_BASIC_INFORMATION = unsafe { mem::zeroed() };
            let status = unsafe {
                NtQueryInformationProcess(
                    process.0,
                    ProcessBasicInformation,
                    (&mut info as *mut PROCESS_BASIC_INFORMATION).cast::<c_void>(),
                    mem::size_of::<PROCESS_BASIC_INFORMATION>() as u32,
                    ptr::null_mut(),
                )
            };
            if status < 0 {
                return Err(NativeError::Os {
                    op: "NtQueryInformationProcess",
                    code: status,
                    message: format!("NTSTATUS {:#010x}", status),
                });
            }

            let peb: PEB = read_value(&process, info.PebBaseAddress as usize)?;
            let params_addr = peb.ProcessParameters as usize;
            let params: RTL_USER_PROCESS_PARAMETERS = read_value(&process, params_addr)?;
            let command_line = read_unicode(&process, &params.CommandLine)?;
            let exec_path = read_unicode(&process, &params.ImagePathName)
                .ok()
                .filter(|p| !p.is_empty());

            // The Environment field directly follows CommandLine.
            let env_addr: usize =
                read_value(&process, params_addr + mem::size_of::<RTL_USER_PROCESS_PARAMETERS>())?;
            let environment = read_env_block(&process, env_addr)
                .map(|block| parse_env_block(&block))
                .unwrap_or_default();

            Ok(ProcessArgs {
                exec_path,
                arguments: split_command_line(&command_line),
                environment,
            })
        }
    }

    fn read_bytes(process: &Handle, addr: usize, buf: &mut [u8]) -> NativeResult<()> {
        let mut read = 0usize;
        let ok = unsafe {
            ReadProcessMemory(
                process.0,
                addr as *const c_void,
                buf.as_mut_ptr().cast::<c_void>(),
                buf.len(),
                &mut read,
            )
        };
        if ok == 0 || read != buf.len() {
            return Err(NativeError::last_os("ReadProcessMemory"));
        }
        Ok(())
    }

    /// `T` must be plain data valid for any bit pattern.
    fn read_value<T: Copy>(process: &Handle, addr: usize) -> NativeResult<T> {
        let mut value = MaybeUninit::<T>::zeroed();
        let bytes =
            unsafe { slice::from_raw_parts_mut(value.as_mut_ptr().cast::<u8>(), mem::size_of::<T>()) };
        read_bytes(process, addr, bytes)?;
        Ok(unsafe { value.assume_init() })
    }

    fn read_units(process: &Handle, addr: usize, units: usize) -> NativeResult<Vec<u16>> {
        let mut buf = vec![0u16; units];
        let bytes = unsafe {
            slice::from_raw_parts_mut(buf.as_mut_ptr().cast::<u8>(), units * mem::size_of::<u16>())
        };
        read_bytes(process, addr, bytes)?;
        Ok(buf)
    }

    fn read_unicode(process: &Handle, s: &UNICODE_STRING) -> NativeResult<String> {
        let units = usize::from(s.Length) / mem::size_of::<u16>();
        if units == 0 || s.Buffer.is_null() {
            return Ok(String::new());
        }
        let buf = read_units(process, s.Buffer as usize, units)?;
        Ok(String::from_utf16_lossy(&buf))
    }

    /// The block has no recorded length; read to the end of its memory
    /// region, bounded by `ENV_BLOCK_MAX`.
    fn read_env_block(process: &Handle, addr: usize) -> NativeResult<Vec<u16>> {
        if addr == 0 {
            return Ok(Vec::new());
        }
        let mut region: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
        let n = unsafe {
            VirtualQueryEx(
                process.0,
                addr as *const c_void,
                &mut region,
                mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if n == 0 {
            return Err(NativeError::last_os("VirtualQueryEx"));
        }
        let region_end = region.BaseAddress as usize + region.RegionSize;
        let len = region_end.saturating_sub(addr).min(ENV_BLOCK_MAX);
        read_units(process, addr, len / mem::size_of::<u16>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn plain_words() {
        assert_eq!(split_command_line("prog  a\tb "), ["prog", "a", "b"]);
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn quoted_paths_keep_spaces() {
        let line = r#""C:\Program Files\app.exe" --name "two words""#;
        assert_eq!(
            split_command_line(line),
            [r"C:\Program Files\app.exe", "--name", "two words"]
        );
    }

    #[test]
    fn backslash_rules() {
        // Odd run before a quote: literal quote.
        assert_eq!(split_command_line(r#"a\\\"b"#), [r#"a\"b"#]);
        // Even run before a quote: halved, quote toggles.
        assert_eq!(split_command_line(r#""a\\" b"#), [r"a\", "b"]);
        // Not before a quote: literal.
        assert_eq!(split_command_line(r"a\\b"), [r"a\\b"]);
    }

    #[test]
    fn empty_and_doubled_quotes() {
        assert_eq!(split_command_line(r#""" x"#), ["", "x"]);
        assert_eq!(split_command_line(r#""a""b""#), [r#"a"b"#]);
    }

    #[test]
    fn env_block() {
        let mut block = wide("=C:=C:\\work");
        block.push(0);
        block.extend(wide("Path=C:\\Windows;C:\\bin"));
        block.push(0);
        block.extend(wide("EMPTY="));
        block.push(0);
        block.push(0);
        // Bytes past the terminator are ignored.
        block.extend(wide("STALE=1"));

        let env = parse_env_block(&block);
        assert_eq!(env.len(), 2);
        assert_eq!(env["Path"], "C:\\Windows;C:\\bin");
        assert_eq!(env["EMPTY"], "");
    }

    #[test]
    fn env_block_without_terminator() {
        let env = parse_env_block(&wide("A=1"));
        assert_eq!(env["A"], "1");
    }

    #[cfg(windows)]
    #[test]
    fn current_process_listed_without_parent() {
        use osprobe_core::kprint::Logger;

        let me = std::process::id() as osprobe_core::process::Pid;
        let procs = Toolhelp::new(Logger::silent()).snapshot().unwrap();
        assert!(procs.iter().all(|d| d.ppid().is_none()));
        let d = procs.iter().find(|d| d.pid() == me).unwrap();
        assert!(!d.arguments().is_empty());
        assert!(d.environment().contains_key("PATH") || d.environment().contains_key("Path"));
    }
}
