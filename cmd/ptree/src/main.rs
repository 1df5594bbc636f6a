//! ptree: show what osprobe can see on this host.
//!
//! Prints the platform, the capability table and the process list
//! (pid, ppid, command line), children indented under their parent.
//!
//! Usage:
//!   ptree              # capabilities + process tree
//!   ptree --flat       # one line per process, kernel order
//!   ptree --env PID    # environment of one process
//!
//! # Environment Variables
//!
//! - `OSPROBE_LOG_LEVEL=debug` - Log level (off, error, warn, info, debug, trace)
//! - `OSPROBE_FLUSH_EPRINT=1` - Flush log output immediately
//! - `OSPROBE_ENABLE_ZFS=0` - Skip loading libzfs

use std::collections::{BTreeMap, HashSet};
use std::process::ExitCode;

use osprobe::{Capability, CapabilityProbe, NativeSupport, Pid, ProcessDescriptor};

enum Mode {
    Tree,
    Flat,
    Env(Pid),
}

fn parse_args() -> Result<Mode, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => Ok(Mode::Tree),
        Some("--flat") => Ok(Mode::Flat),
        Some("--env") => args
            .get(1)
            .and_then(|s| s.parse().ok())
            .map(Mode::Env)
            .ok_or_else(|| "--env needs a numeric PID".to_string()),
        Some(other) => Err(format!("unknown argument {}", other)),
    }
}

fn print_capabilities(native: &NativeSupport) {
    println!("platform: {} ({}-bit)", osprobe::Platform::current(), osprobe::WordWidth::current().bits());
    println!("capabilities:");
    for cap in Capability::ALL {
        let mark = if native.supports(cap) { "yes" } else { "-" };
        println!("  {:<18} {}", cap.name(), mark);
    }
    println!();
}

fn print_flat(procs: &[ProcessDescriptor]) {
    println!("{:>7} {:>7}  COMMAND", "PID", "PPID");
    for p in procs {
        println!("{:>7} {:>7}  {}", p.pid(), ppid_str(p), label(p));
    }
}

fn print_tree(procs: &[ProcessDescriptor]) {
    let pids: HashSet<Pid> = procs.iter().map(|p| p.pid()).collect();
    let mut children: BTreeMap<Pid, Vec<&ProcessDescriptor>> = BTreeMap::new();
    let mut roots = Vec::new();
    for p in procs {
        match p.ppid() {
            // pid 0 on Darwin is its own parent
            Some(ppid) if ppid != p.pid() && pids.contains(&ppid) => {
                children.entry(ppid).or_default().push(p)
            }
            _ => roots.push(p),
        }
    }
    roots.sort_by_key(|p| p.pid());

    let mut stack: Vec<(&ProcessDescriptor, usize)> = roots.into_iter().rev().map(|p| (p, 0)).collect();
    while let Some((p, depth)) = stack.pop() {
        println!("{:>7}  {}{}", p.pid(), "  ".repeat(depth), label(p));
        if let Some(kids) = children.get(&p.pid()) {
            let mut kids = kids.clone();
            kids.sort_by_key(|k| k.pid());
            stack.extend(kids.into_iter().rev().map(|k| (k, depth + 1)));
        }
    }
}

fn print_env(procs: &[ProcessDescriptor], pid: Pid) -> Result<(), String> {
    let p = procs
        .iter()
        .find(|p| p.pid() == pid)
        .ok_or_else(|| format!("no process {}", pid))?;
    println!("pid {}: {}", pid, label(p));
    let env = p.environment();
    if env.is_empty() {
        println!("  (environment not readable)");
    }
    let sorted: BTreeMap<_, _> = env.iter().collect();
    for (k, v) in sorted {
        println!("  {}={}", k, v);
    }
    Ok(())
}

fn ppid_str(p: &ProcessDescriptor) -> String {
    p.ppid().map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
}

fn label(p: &ProcessDescriptor) -> String {
    let cmd = p.command_line();
    if cmd.is_empty() {
        "[unreadable]".to_string()
    } else {
        cmd
    }
}

fn main() -> ExitCode {
    let mode = match parse_args() {
        Ok(m) => m,
        Err(e) => {
            eprintln!("ptree: {}", e);
            eprintln!("usage: ptree [--flat | --env PID]");
            return ExitCode::from(2);
        }
    };

    let native = NativeSupport::detect();
    if !matches!(mode, Mode::Env(_)) {
        print_capabilities(&native);
    }

    let procs = match native.processes() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ptree: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match mode {
        Mode::Tree => {
            print_tree(&procs);
            Ok(())
        }
        Mode::Flat => {
            print_flat(&procs);
            Ok(())
        }
        Mode::Env(pid) => print_env(&procs, pid),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ptree: {}", e);
            ExitCode::FAILURE
        }
    }
}
