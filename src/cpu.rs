// src/cpu.rs
//! Host CPU topology discovery.
//!
//! Counts come from `num_cpus`; cache geometry, NUMA layout, and the
//! vendor string are read from `/sys` and `/proc` on Linux.  Every field
//! degrades to a conservative default on platforms or kernels that do not
//! expose the information, so `query` only fails when the process cannot
//! determine even the hardware thread count.
//!
//! This allocates and reads files; do not call it in performance-critical
//! code.

use crate::error::Result;

/// Cache line size assumed when the platform does not report one.
pub const DEFAULT_CACHE_LINE_SIZE: u32 = 64;

/// Description of the host system's CPU layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuInfo {
    /// Number of NUMA nodes; at least 1.
    pub numa_nodes: u32,
    /// Number of physical CPU packages; at least 1.
    pub physical_cpus: u32,
    /// Total physical cores across all packages.
    pub physical_cores: u32,
    /// Total hardware threads across all packages.
    pub hardware_threads: u32,
    /// Hardware threads per physical core.
    pub threads_per_core: u32,
    /// Size of the L1 data cache in bytes, or 0 if unknown.
    pub cache_size_l1: u32,
    /// L1 data cache line size in bytes.
    pub cache_line_size_l1: u32,
    /// Size of the unified L2 cache in bytes, or 0 if unknown.
    pub cache_size_l2: u32,
    /// L2 cache line size in bytes.
    pub cache_line_size_l2: u32,
    /// CPU vendor string, empty if unknown.
    pub vendor: String,
    /// True when the system appears to be a virtual machine.
    pub is_virtual_machine: bool,
}

impl CpuInfo {
    /// Queries the host system.
    pub fn query() -> Result<CpuInfo> {
        let hardware_threads = num_cpus::get() as u32;
        let physical_cores = num_cpus::get_physical() as u32;
        let threads_per_core = if physical_cores > 0 {
            (hardware_threads / physical_cores).max(1)
        } else {
            1
        };

        let mut info = CpuInfo {
            numa_nodes: 1,
            physical_cpus: 1,
            physical_cores: physical_cores.max(1),
            hardware_threads: hardware_threads.max(1),
            threads_per_core,
            cache_size_l1: 0,
            cache_line_size_l1: DEFAULT_CACHE_LINE_SIZE,
            cache_size_l2: 0,
            cache_line_size_l2: DEFAULT_CACHE_LINE_SIZE,
            vendor: String::new(),
            is_virtual_machine: false,
        };
        #[cfg(target_os = "linux")]
        info.refine_from_sysfs();
        Ok(info)
    }

    #[cfg(target_os = "linux")]
    fn refine_from_sysfs(&mut self) {
        use std::fs;

        if let Ok(nodes) = fs::read_dir("/sys/devices/system/node") {
            let count = nodes
                .flatten()
                .filter(|entry| {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    name.starts_with("node") && name[4..].parse::<u32>().is_ok()
                })
                .count() as u32;
            if count > 0 {
                self.numa_nodes = count;
            }
        }

        // Walk cpu0's cache hierarchy for L1 data and unified L2 geometry.
        for index in 0..8 {
            let base = format!("/sys/devices/system/cpu/cpu0/cache/index{}", index);
            let Some(level) = read_u32(&format!("{}/level", base)) else {
                break;
            };
            let kind = fs::read_to_string(format!("{}/type", base)).unwrap_or_default();
            let size = read_size_kib(&format!("{}/size", base));
            let line = read_u32(&format!("{}/coherency_line_size", base));
            match (level, kind.trim()) {
                (1, "Data") => {
                    if let Some(bytes) = size {
                        self.cache_size_l1 = bytes;
                    }
                    if let Some(line) = line {
                        self.cache_line_size_l1 = line;
                    }
                }
                (2, "Unified") => {
                    if let Some(bytes) = size {
                        self.cache_size_l2 = bytes;
                    }
                    if let Some(line) = line {
                        self.cache_line_size_l2 = line;
                    }
                }
                _ => {}
            }
        }

        if let Ok(cpuinfo) = fs::read_to_string("/proc/cpuinfo") {
            let mut packages = std::collections::HashSet::new();
            for line in cpuinfo.lines() {
                if let Some(value) = field(line, "vendor_id") {
                    if self.vendor.is_empty() {
                        self.vendor = value.to_string();
                    }
                } else if let Some(value) = field(line, "physical id") {
                    if let Ok(id) = value.parse::<u32>() {
                        packages.insert(id);
                    }
                } else if let Some(value) = field(line, "flags") {
                    if value.split_whitespace().any(|flag| flag == "hypervisor") {
                        self.is_virtual_machine = true;
                    }
                }
            }
            if !packages.is_empty() {
                self.physical_cpus = packages.len() as u32;
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    if key.trim() == name {
        Some(value.trim())
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
fn read_u32(path: &str) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Parses sysfs cache sizes of the form `32K` or `1024K` into bytes.
#[cfg(target_os = "linux")]
fn read_size_kib(path: &str) -> Option<u32> {
    let text = std::fs::read_to_string(path).ok()?;
    let text = text.trim();
    let kib: u32 = text.strip_suffix('K')?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_reports_sane_counts() {
        let info = CpuInfo::query().unwrap();
        assert!(info.hardware_threads >= 1);
        assert!(info.physical_cores >= 1);
        assert!(info.hardware_threads >= info.physical_cores);
        assert!(info.threads_per_core >= 1);
        assert!(info.numa_nodes >= 1);
    }

    #[test]
    fn test_cache_line_sizes_are_powers_of_two() {
        let info = CpuInfo::query().unwrap();
        assert!(info.cache_line_size_l1.is_power_of_two());
        assert!(info.cache_line_size_l2.is_power_of_two());
    }
}
