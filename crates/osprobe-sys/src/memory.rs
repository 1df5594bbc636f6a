//! Physical and swap memory totals.

use osprobe_core::error::{NativeError, NativeResult};

/// Memory figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemMemory {
    pub total_physical: u64,
    pub available_physical: u64,
    pub total_swap: u64,
    pub available_swap: u64,
}

/// Parse `/proc/meminfo` text.
///
/// `MemAvailable` is missing before Linux 3.14; `MemFree` stands in.
pub fn parse_meminfo(text: &str) -> NativeResult<SystemMemory> {
    let mut total = None;
    let mut available = None;
    let mut free = None;
    let mut swap_total = None;
    let mut swap_free = None;

    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "MemTotal" => &mut total,
            "MemAvailable" => &mut available,
            "MemFree" => &mut free,
            "SwapTotal" => &mut swap_total,
            "SwapFree" => &mut swap_free,
            _ => continue,
        };
        *slot = parse_kb(rest);
    }

    Ok(SystemMemory {
        total_physical: total.ok_or(NativeError::Malformed("meminfo: MemTotal"))?,
        available_physical: available
            .or(free)
            .ok_or(NativeError::Malformed("meminfo: MemFree"))?,
        total_swap: swap_total.unwrap_or(0),
        available_swap: swap_free.unwrap_or(0),
    })
}

/// "  16318480 kB" -> bytes
fn parse_kb(field: &str) -> Option<u64> {
    let mut parts = field.split_whitespace();
    let value: u64 = parts.next()?.parse().ok()?;
    match parts.next() {
        Some("kB") => value.checked_mul(1024),
        None => Some(value),
        Some(_) => None,
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub fn system_memory() -> NativeResult<SystemMemory> {
            let text = std::fs::read_to_string("/proc/meminfo")
                .map_err(|e| crate::files::io_err("read /proc/meminfo", e))?;
            parse_meminfo(&text)
        }
    } else {
        pub fn system_memory() -> NativeResult<SystemMemory> {
            Err(NativeError::Unsupported(osprobe_core::Capability::SystemMemory))
        }
    }
}
