//! Single-shot resource sample.
//!
//! Open targets report CPU, memory and root-filesystem usage gathered by one
//! composed command. Allocated servers have no machine of their own: disk usage
//! is the size of the jail, totals come from the advertised limits, and the
//! remaining fields stay empty.

use crate::target::ResourceLimits;
use serde::Serialize;

/// Prints `CPU:`, `MEM:` and `DISK:` lines; any of them may be empty.
pub const OPEN_SAMPLE: &str = r#"(
cpu=$(top -bn1 2>/dev/null | grep 'Cpu(s)' | sed 's/.*, *\([0-9.]*\)%* id.*/\1/' | awk '{print 100 - $1}')
echo "CPU:$cpu"
mem=$(free -m 2>/dev/null | grep Mem | awk '{print $3, $2}')
echo "MEM:$mem"
disk=$(df -BG / 2>/dev/null | tail -1 | awk '{print $3, $2, $5}' | sed 's/G//g' | sed 's/%//')
echo "DISK:$disk"
) 2>/dev/null"#;

/// Jail size in KiB.
pub const JAILED_SAMPLE: &str = "du -sk ~ 2>/dev/null | cut -f1";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetailedStats {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub memory_used_mb: Option<f64>,
    pub memory_total_mb: Option<f64>,
    pub disk_percent: Option<f64>,
    pub disk_used_gb: Option<f64>,
    pub disk_total_gb: Option<f64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn numbers(raw: &str) -> Option<Vec<f64>> {
    raw.split_whitespace().map(|p| p.parse::<f64>().ok()).collect()
}

/// Parses [`OPEN_SAMPLE`] output. Out-of-range or malformed values are left
/// as `None`.
pub fn parse_open_sample(stdout: &str) -> DetailedStats {
    let mut stats = DetailedStats::default();

    for line in stdout.lines() {
        let line = line.trim();
        if let Some(cpu) = line.strip_prefix("CPU:") {
            if let Ok(value) = cpu.trim().parse::<f64>()
                && (0.0..=100.0).contains(&value)
            {
                stats.cpu_percent = Some(round2(value));
            }
        } else if let Some(mem) = line.strip_prefix("MEM:") {
            if let Some([used, total, ..]) = numbers(mem).as_deref()
                && *total > 0.0
            {
                stats.memory_used_mb = Some(round2(*used));
                stats.memory_total_mb = Some(round2(*total));
                stats.memory_percent = Some(round2(used / total * 100.0));
            }
        } else if let Some(disk) = line.strip_prefix("DISK:")
            && let Some([used, total, percent, ..]) = numbers(disk).as_deref()
            && *total > 0.0
            && (0.0..=100.0).contains(percent)
        {
            stats.disk_used_gb = Some(round2(*used));
            stats.disk_total_gb = Some(round2(*total));
            stats.disk_percent = Some(round2(*percent));
        }
    }
    stats
}

/// Builds stats for an allocated server from [`JAILED_SAMPLE`] output.
pub fn jailed_stats(du_stdout: &str, limits: &ResourceLimits) -> DetailedStats {
    let used_gb = du_stdout
        .trim()
        .parse::<f64>()
        .ok()
        .map(|kib| kib / (1024.0 * 1024.0));

    let mut stats = DetailedStats {
        disk_used_gb: used_gb.map(round2),
        disk_total_gb: limits.disk_gb.map(round2),
        memory_total_mb: limits.memory_gb.map(|gb| round2(gb * 1024.0)),
        ..DetailedStats::default()
    };
    if let (Some(used), Some(total)) = (used_gb, limits.disk_gb)
        && total > 0.0
    {
        stats.disk_percent = Some(round2((used / total * 100.0).min(100.0)));
    }
    stats
}
