//! Move a file, replacing the destination.

use std::fs;
use std::io;
use std::path::Path;

use osprobe_core::error::{NativeError, NativeResult};
use osprobe_core::kdebug;
use osprobe_core::kprint::Logger;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        /// ERROR_NOT_SAME_DEVICE
        const CROSS_DEVICE: i32 = 17;
    } else {
        const CROSS_DEVICE: i32 = libc::EXDEV;
    }
}

/// Rename `from` to `to`, replacing an existing `to`. A rename that
/// cannot cross volumes becomes copy then remove.
pub fn move_file(from: &Path, to: &Path, log: Logger) -> NativeResult<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE) => {
            kdebug!(log, "{} -> {} crosses volumes; copying", from.display(), to.display());
            fs::copy(from, to).map_err(move_err)?;
            fs::remove_file(from).map_err(move_err)
        }
        Err(e) => Err(move_err(e)),
    }
}

fn move_err(e: io::Error) -> NativeError {
    match e.raw_os_error() {
        Some(code) => NativeError::os("move_file", code),
        None => NativeError::Os {
            op: "move_file",
            code: 0,
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("osprobe-move-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn replaces_existing_destination() {
        let dir = scratch("replace");
        let (a, b) = (dir.join("a"), dir.join("b"));
        fs::write(&a, b"new").unwrap();
        fs::write(&b, b"old").unwrap();
        move_file(&a, &b, Logger::silent()).unwrap();
        assert!(!a.exists());
        assert_eq!(fs::read(&b).unwrap(), b"new");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_source_is_os_error() {
        let dir = scratch("missing");
        let err = move_file(&dir.join("nope"), &dir.join("b"), Logger::silent()).unwrap_err();
        assert!(err.code().is_some());
        fs::remove_dir_all(&dir).unwrap();
    }
}
