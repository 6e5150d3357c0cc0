//! Process-wide engine configuration.
//!
//! `spec.md` §9 calls out `l2size`/`nbits1`/`nbits2` as configuration that must
//! be threaded explicitly rather than mutated as globals, so tests can swap in
//! different values. `EngineConfig` is that record.

use std::fs;

/// Fallback L2 cache size when OS probing fails, per spec.md §6.
const FALLBACK_L2_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Radix bits used on partitioning pass 1. Default 8.
    pub nbits1: u8,
    /// Radix bits used on partitioning pass 2. Default 10.
    pub nbits2: u8,
    /// Worker threads in the job scheduler used by partitioning/PHJ.
    pub job_threads: usize,
    /// Concurrent query slots in the CLI driver's job pool.
    pub query_threads: usize,
    /// L2 cache size in bytes, already divided by `job_threads`.
    pub l2_size: usize,
}

impl EngineConfig {
    pub fn new(job_threads: usize, query_threads: usize) -> Self {
        let total_l2 = detect_l2_cache_size();
        Self {
            nbits1: 8,
            nbits2: 10,
            job_threads,
            query_threads,
            l2_size: total_l2 / job_threads.max(1),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(num_cpus::get().max(1), 3)
    }
}

/// Detects the machine's L2 cache size, falling back to 256 KiB.
///
/// Linux: reads `/sys/devices/system/cpu/cpu0/cache/index2/size`. macOS: shells
/// out to `sysctl -n hw.l2cachesize`. Mirrors
/// `original_source/modules/helpers/helpers.c`'s `getL2CacheSize`, but uses the
/// safe OS-exposed interfaces instead of a `sysconf`/`sysctlbyname` FFI call.
pub fn detect_l2_cache_size() -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Ok(raw) = fs::read_to_string("/sys/devices/system/cpu/cpu0/cache/index2/size") {
            if let Some(size) = parse_sysfs_cache_size(&raw) {
                return size;
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(out) = std::process::Command::new("sysctl")
            .arg("-n")
            .arg("hw.l2cachesize")
            .output()
        {
            if out.status.success() {
                if let Ok(text) = String::from_utf8(out.stdout) {
                    if let Ok(size) = text.trim().parse::<usize>() {
                        return size;
                    }
                }
            }
        }
    }

    FALLBACK_L2_SIZE
}

/// Parses values like `"1024K\n"` or `"2097152"` from Linux sysfs cache nodes.
fn parse_sysfs_cache_size(raw: &str) -> Option<usize> {
    let trimmed = raw.trim();
    if let Some(kib) = trimmed.strip_suffix('K') {
        kib.parse::<usize>().ok().map(|k| k * 1024)
    } else if let Some(mib) = trimmed.strip_suffix('M') {
        mib.parse::<usize>().ok().map(|m| m * 1024 * 1024)
    } else {
        trimmed.parse::<usize>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kib_suffix() {
        assert_eq!(parse_sysfs_cache_size("1024K\n"), Some(1024 * 1024));
    }

    #[test]
    fn parses_plain_bytes() {
        assert_eq!(parse_sysfs_cache_size("2097152"), Some(2_097_152));
    }

    #[test]
    fn falls_back_when_unparseable() {
        assert_eq!(parse_sysfs_cache_size("nonsense"), None);
    }

    #[test]
    fn config_defaults_match_spec() {
        let cfg = EngineConfig::new(4, 3);
        assert_eq!(cfg.nbits1, 8);
        assert_eq!(cfg.nbits2, 10);
        assert_eq!(cfg.job_threads, 4);
        assert_eq!(cfg.query_threads, 3);
    }
}
