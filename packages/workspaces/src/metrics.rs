// ABOUTME: Normalization of raw substrate resource counters into percentages
// ABOUTME: Pure functions shared by the Docker stats path and the cluster metrics path

use crate::types::WorkspaceMetrics;

/// Memory limits at or above this are treated as "no limit".
///
/// cgroup v1 reports `PAGE_COUNTER_MAX` (just under `i64::MAX`) for
/// unconstrained containers; no real host is anywhere near 4 EiB.
pub const UNBOUNDED_MEMORY_THRESHOLD: u64 = 1 << 62;

/// Cumulative CPU counters from one stats sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    /// Total CPU time consumed by the unit
    pub total_usage: u64,
    /// Total CPU time elapsed on the host
    pub system_usage: u64,
}

/// One stats read from the container engine: current and previous counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub cpu: CpuCounters,
    pub precpu: CpuCounters,
    pub online_cpus: Option<u64>,
    /// Length of the per-CPU usage vector, used when `online_cpus` is missing
    pub percpu_count: Option<u64>,
    pub memory_usage: u64,
    pub memory_limit: Option<u64>,
}

impl UsageSnapshot {
    pub fn normalize(&self) -> WorkspaceMetrics {
        let cpus = self
            .online_cpus
            .filter(|n| *n > 0)
            .or(self.percpu_count.filter(|n| *n > 0))
            .unwrap_or(1);
        let memory_limit = effective_memory_limit(self.memory_limit);

        WorkspaceMetrics {
            cpu_percent: cpu_percent(self.cpu, self.precpu, cpus),
            memory_usage_bytes: self.memory_usage,
            memory_limit_bytes: memory_limit,
            memory_percent: memory_percent(self.memory_usage, memory_limit),
        }
    }
}

/// CPU utilization between two cumulative samples.
///
/// `(Δcpu / Δsystem) * online_cpus * 100`, or 0 when either delta is not
/// positive (first sample, counter reset after restart).
pub fn cpu_percent(current: CpuCounters, previous: CpuCounters, online_cpus: u64) -> f64 {
    let cpu_delta = current.total_usage as i128 - previous.total_usage as i128;
    let system_delta = current.system_usage as i128 - previous.system_usage as i128;

    if cpu_delta <= 0 || system_delta <= 0 {
        return 0.0;
    }

    let percent = (cpu_delta as f64 * online_cpus as f64 * 100.0) / system_delta as f64;
    round_hundredths(percent)
}

/// A reported limit that actually constrains the unit, if any
pub fn effective_memory_limit(limit: Option<u64>) -> Option<u64> {
    limit.filter(|l| *l > 0 && *l < UNBOUNDED_MEMORY_THRESHOLD)
}

/// `usage / limit * 100`; `None` when there is no effective limit
pub fn memory_percent(usage: u64, limit: Option<u64>) -> Option<f64> {
    let limit = effective_memory_limit(limit)?;
    Some(round_hundredths(usage as f64 / limit as f64 * 100.0))
}

/// Cluster CPU usage in cores against a limit in cores
pub fn cpu_percent_of_limit(usage_cores: f64, limit_cores: f64) -> f64 {
    if usage_cores <= 0.0 || limit_cores <= 0.0 {
        return 0.0;
    }
    round_hundredths(usage_cores / limit_cores * 100.0)
}

/// Parse a cluster CPU quantity (`250m`, `1`, `0.5`, `123456n`, `15u`) into cores
pub fn parse_cpu_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let (number, scale) = match quantity.char_indices().last()? {
        (i, 'n') => (&quantity[..i], 1e-9),
        (i, 'u') => (&quantity[..i], 1e-6),
        (i, 'm') => (&quantity[..i], 1e-3),
        _ => (quantity, 1.0),
    };

    let value: f64 = number.parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value * scale)
}

/// Parse a cluster memory quantity (`512Mi`, `2Gi`, `1G`, `128974848`, `129e6`) into bytes
pub fn parse_memory_quantity(quantity: &str) -> Option<u64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }

    // Binary suffixes first so "Mi" is not read as "M"
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, multiplier)| {
            quantity
                .strip_suffix(suffix)
                .map(|number| (number, *multiplier))
        })
        .unwrap_or((quantity, 1.0));

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
