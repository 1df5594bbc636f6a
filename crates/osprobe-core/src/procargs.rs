//! Decoder for the raw per-process argument area (`KERN_PROCARGS2`).
//!
//! The kernel copies the top of the target's user stack:
//!
//! ```text
//! [argc: i32][exec_path \0][\0 padding][arg0 \0]..[argN-1 \0][\0 padding][env0 \0]..[\0]
//! ```
//!
//! There are no lengths except `argc`. Decoding is a single forward pass
//! over a cursor that never rewinds. Every string read treats the end of
//! the buffer as a terminator, so a blob the kernel truncated still
//! yields everything up to the cut.

use std::collections::HashMap;

use crate::error::{NativeError, NativeResult};

/// Decoded argument vector and environment of one process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessArgs {
    /// Executable path as recorded by the kernel (may differ from argv[0]).
    pub exec_path: Option<String>,
    pub arguments: Vec<String>,
    pub environment: HashMap<String, String>,
}

impl ProcessArgs {
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty() && self.environment.is_empty()
    }

    /// Arguments joined by single spaces.
    pub fn command_line(&self) -> String {
        self.arguments.join(" ")
    }
}

/// Split `KEY=VALUE` at the first '='. Entries without '=' or with an
/// empty key are rejected.
pub fn split_env_entry(entry: &str) -> Option<(&str, &str)> {
    match entry.find('=') {
        Some(sep) if sep > 0 => Some((&entry[..sep], &entry[sep + 1..])),
        _ => None,
    }
}

/// Forward-only reader over the blob.
struct Cursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    #[inline]
    fn has_more(&self) -> bool {
        self.offset < self.buf.len()
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.offset).copied()
    }

    fn read_i32(&mut self) -> Option<i32> {
        let end = self.offset.checked_add(4)?;
        let bytes: [u8; 4] = self.buf.get(self.offset..end)?.try_into().ok()?;
        self.offset = end;
        Some(i32::from_ne_bytes(bytes))
    }

    /// Read up to the next NUL (consumed) or the end of the buffer.
    fn read_str(&mut self) -> String {
        let buf = self.buf;
        let rest = &buf[self.offset..];
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        self.offset += len;
        if self.has_more() {
            self.offset += 1;
        }
        String::from_utf8_lossy(&rest[..len]).into_owned()
    }

    fn skip_nuls(&mut self) {
        while self.peek() == Some(0) {
            self.offset += 1;
        }
    }
}

/// Decode one blob.
///
/// Errors only when `argc` itself is missing or negative; anything after
/// that degrades to a partial result.
pub fn decode(blob: &[u8]) -> NativeResult<ProcessArgs> {
    let mut cur = Cursor::new(blob);

    let argc = cur
        .read_i32()
        .ok_or(NativeError::Malformed("blob shorter than argc"))?;
    if argc < 0 {
        return Err(NativeError::Malformed("negative argc"));
    }

    let exec_path = cur.read_str();
    let mut out = ProcessArgs {
        exec_path: (!exec_path.is_empty()).then_some(exec_path),
        // argc comes from the target process; don't trust it for capacity.
        arguments: Vec::with_capacity((argc as usize).min(256)),
        environment: HashMap::new(),
    };

    for _ in 0..argc {
        cur.skip_nuls();
        if !cur.has_more() {
            break;
        }
        out.arguments.push(cur.read_str());
    }

    // Padding between the argument and environment blocks. Skipping the
    // whole NUL run means strings after an empty environment (Apple's
    // `executable_path=` area) decode as environment entries.
    cur.skip_nuls();

    while cur.peek().is_some_and(|b| b != 0) {
        let entry = cur.read_str();
        if let Some((key, value)) = split_env_entry(&entry) {
            out.environment.insert(key.to_string(), value.to_string());
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a blob: argc, exec path, padding, args, padding, env, NUL.
    fn blob(exec: &str, args: &[&str], env: &[&str], pad: usize) -> Vec<u8> {
        let mut b = (args.len() as i32).to_ne_bytes().to_vec();
        b.extend_from_slice(exec.as_bytes());
        b.push(0);
        b.extend(std::iter::repeat(0).take(pad));
        for a in args {
            b.extend_from_slice(a.as_bytes());
            b.push(0);
        }
        b.extend(std::iter::repeat(0).take(pad));
        for e in env {
            b.extend_from_slice(e.as_bytes());
            b.push(0);
        }
        b.push(0);
        b
    }

    #[test]
    fn shell_invocation() {
        let b = blob("/bin/sh", &["/bin/sh", "-c"], &["HOME=/root", "X"], 3);
        let out = decode(&b).unwrap();
        assert_eq!(out.arguments, vec!["/bin/sh", "-c"]);
        assert_eq!(out.environment.len(), 1);
        assert_eq!(out.environment["HOME"], "/root");
        assert_eq!(out.exec_path.as_deref(), Some("/bin/sh"));
    }

    #[test]
    fn arguments_keep_order_and_count() {
        let args = ["java", "-Xmx1g", "-jar", "hudson.war", "--httpPort=8080"];
        let env = ["PATH=/usr/bin:/bin", "LANG=C", "EMPTY=", "A=b=c"];
        let out = decode(&blob("/usr/bin/java", &args, &env, 6)).unwrap();
        assert_eq!(out.arguments, args);
        assert_eq!(out.environment.len(), 4);
        assert_eq!(out.environment["EMPTY"], "");
        // Split happens at the first '=' only.
        assert_eq!(out.environment["A"], "b=c");
        assert_eq!(out.command_line(), "java -Xmx1g -jar hudson.war --httpPort=8080");
    }

    #[test]
    fn entries_without_key_are_skipped() {
        let env = ["=oops", "noequals", "OK=1"];
        let out = decode(&blob("/x", &["x"], &env, 1)).unwrap();
        assert_eq!(out.environment.len(), 1);
        assert_eq!(out.environment["OK"], "1");
    }

    #[test]
    fn no_padding_between_blocks() {
        let out = decode(&blob("/bin/ls", &["ls", "-l"], &["TERM=xterm"], 0)).unwrap();
        assert_eq!(out.arguments, vec!["ls", "-l"]);
        assert_eq!(out.environment["TERM"], "xterm");
    }

    #[test]
    fn truncated_inside_argument() {
        let mut b = blob("/bin/echo", &["echo", "hello-world"], &["K=V"], 2);
        let cut = b.windows(5).position(|w| w == b"hello").unwrap() + 5;
        b.truncate(cut);
        let out = decode(&b).unwrap();
        assert_eq!(out.arguments, vec!["echo", "hello"]);
        assert!(out.environment.is_empty());
    }

    #[test]
    fn truncated_inside_environment() {
        let mut b = blob("/bin/echo", &["echo"], &["LONGNAME=abcdef"], 1);
        let cut = b.windows(3).position(|w| w == b"abc").unwrap() + 3;
        b.truncate(cut);
        let out = decode(&b).unwrap();
        assert_eq!(out.environment["LONGNAME"], "abc");
    }

    #[test]
    fn argc_larger_than_data() {
        let mut b = 5i32.to_ne_bytes().to_vec();
        b.extend_from_slice(b"/a\0\0one\0two");
        let out = decode(&b).unwrap();
        assert_eq!(out.arguments, vec!["one", "two"]);
    }

    #[test]
    fn empty_blob_is_malformed() {
        assert!(matches!(decode(&[]), Err(NativeError::Malformed(_))));
        assert!(matches!(decode(&[1, 0]), Err(NativeError::Malformed(_))));
    }

    #[test]
    fn negative_argc_is_malformed() {
        let b = (-3i32).to_ne_bytes();
        assert!(matches!(decode(&b), Err(NativeError::Malformed("negative argc"))));
    }

    #[test]
    fn zero_arguments_zero_environment() {
        let out = decode(&blob("", &[], &[], 0)).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.exec_path, None);
    }

    #[test]
    fn non_utf8_is_lossy() {
        let mut b = 1i32.to_ne_bytes().to_vec();
        b.extend_from_slice(b"/p\0\xffarg\0\0");
        let out = decode(&b).unwrap();
        assert_eq!(out.arguments, vec!["\u{fffd}arg"]);
    }

    #[test]
    fn env_split() {
        assert_eq!(split_env_entry("A=1"), Some(("A", "1")));
        assert_eq!(split_env_entry("A="), Some(("A", "")));
        assert_eq!(split_env_entry("=1"), None);
        assert_eq!(split_env_entry("A"), None);
    }

    #[test]
    fn nul_run_after_arguments_is_skipped_even_with_empty_environment() {
        // One argument, an empty environment, then the trailing
        // `executable_path=` string the kernel appends.
        let mut b = 1i32.to_ne_bytes().to_vec();
        b.extend_from_slice(b"/bin/ls\0\0ls\0\0executable_path=/bin/ls\0\0");
        let out = decode(&b).unwrap();
        assert_eq!(out.arguments, vec!["ls"]);
        assert_eq!(out.environment.len(), 1);
        assert_eq!(out.environment["executable_path"], "/bin/ls");
    }
}
