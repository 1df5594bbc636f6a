//! Linux process enumeration through `/proc`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use osprobe_core::error::NativeResult;
use osprobe_core::kprint::Logger;
use osprobe_core::procargs::{split_env_entry, ProcessArgs};
use osprobe_core::process::{ArgumentSource, Pid, ProcessDescriptor};
use osprobe_core::{kdebug, kwarn};

use crate::files::io_err;

const PROC_ROOT: &str = "/proc";

/// Reads `/proc/<pid>/{cmdline,environ,exe}`.
#[derive(Debug, Clone)]
pub struct ProcfsArguments {
    root: PathBuf,
}

impl ProcfsArguments {
    pub fn new() -> Self {
        Self::at(PROC_ROOT)
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcfsArguments {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgumentSource for ProcfsArguments {
    fn load(&self, pid: Pid) -> NativeResult<ProcessArgs> {
        let dir = self.root.join(pid.to_string());
        let cmdline = fs::read(dir.join("cmdline")).map_err(|e| io_err("read cmdline", e))?;
        // environ of another user's process is EACCES; keep the arguments.
        let environ = fs::read(dir.join("environ")).unwrap_or_default();
        let exec_path = fs::read_link(dir.join("exe"))
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        Ok(parse_args(exec_path, &cmdline, &environ))
    }
}

/// Build a `ProcessArgs` from NUL-separated `cmdline` and `environ` data.
pub fn parse_args(exec_path: Option<String>, cmdline: &[u8], environ: &[u8]) -> ProcessArgs {
    let arguments = nul_fields(cmdline).collect();
    let mut environment = HashMap::new();
    for entry in nul_fields(environ) {
        if let Some((k, v)) = split_env_entry(&entry) {
            environment.insert(k.to_string(), v.to_string());
        }
    }
    ProcessArgs {
        exec_path,
        arguments,
        environment,
    }
}

fn nul_fields(data: &[u8]) -> impl Iterator<Item = String> + '_ {
    let data = data.strip_suffix(&[0]).unwrap_or(data);
    data.split(|&b| b == 0)
        .filter(move |_| !data.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
}

/// Parent pid from the contents of `/proc/<pid>/stat`.
///
/// The command name in field 2 is parenthesized and may itself contain
/// spaces or ')', so parsing starts after the last ')'.
pub fn parse_stat_ppid(stat: &str) -> Option<Pid> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Snapshot of `/proc` in directory order.
///
/// Processes that exit between readdir and reading their `stat` are
/// skipped. Failure to list `/proc` at all yields an empty list.
pub fn enumerate(root: &Path, source: Arc<dyn ArgumentSource>, log: Logger) -> Vec<ProcessDescriptor> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            kwarn!(log, "cannot list {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<Pid>().ok()) else {
            continue;
        };
        let stat = match fs::read_to_string(entry.path().join("stat")) {
            Ok(s) => s,
            Err(e) => {
                kdebug!(log, "pid {} vanished: {}", pid, e);
                continue;
            }
        };
        let ppid = parse_stat_ppid(&stat);
        out.push(ProcessDescriptor::new(pid, ppid, Arc::clone(&source), log));
    }
    kdebug!(log, "{} processes under {}", out.len(), root.display());
    out
}

/// Snapshot of the live `/proc`.
pub fn processes(log: Logger) -> Vec<ProcessDescriptor> {
    enumerate(Path::new(PROC_ROOT), Arc::new(ProcfsArguments::new()), log)
}
