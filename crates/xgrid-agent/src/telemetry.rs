//! Host telemetry for the controller heartbeat.
//!
//! CPU and memory come from `/proc`; hosts without it report zero.

use std::time::Duration;

use xgrid_core::NodeStatsReport;

use crate::runtime::ProxyRuntime;

const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(200);

/// Aggregate CPU jiffies from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

/// Busy percentage between two samples.
pub fn cpu_percent(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let idle = after.idle.saturating_sub(before.idle);
    (total.saturating_sub(idle)) as f64 / total as f64 * 100.0
}

/// Used memory percentage from `/proc/meminfo`.
pub fn parse_memory_percent(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find_map(|l| l.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|v| v.parse().ok())
    };
    let total = field("MemTotal")?;
    if total == 0 {
        return None;
    }
    let available = field("MemAvailable").or_else(|| field("MemFree"))?;
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

async fn read_cpu_times() -> Option<CpuTimes> {
    let stat = tokio::fs::read_to_string("/proc/stat").await.ok()?;
    parse_cpu_times(&stat)
}

pub async fn sample_cpu() -> f64 {
    let Some(before) = read_cpu_times().await else {
        return 0.0;
    };
    tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
    read_cpu_times()
        .await
        .map_or(0.0, |after| cpu_percent(before, after))
}

pub async fn sample_memory() -> f64 {
    tokio::fs::read_to_string("/proc/meminfo")
        .await
        .ok()
        .and_then(|m| parse_memory_percent(&m))
        .unwrap_or(0.0)
}

/// Build the heartbeat body. `online_users` is the number of clients in the
/// current runtime configuration.
pub async fn collect(runtime: &ProxyRuntime) -> NodeStatsReport {
    let (cpu_usage, memory_usage) = tokio::join!(sample_cpu(), sample_memory());
    NodeStatsReport {
        status: "online".into(),
        cpu_usage,
        memory_usage,
        online_users: runtime.client_count() as u64,
        clients: Vec::new(),
    }
}
