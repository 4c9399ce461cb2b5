use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};

const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub cpu_usage: f32,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskStats {
    pub total: u64,
    pub available: u64,
    pub percent: f64,
}

/// Samples CPU, memory and root-disk usage on a blocking thread.
pub async fn collect() -> Result<HostStats> {
    tokio::task::spawn_blocking(sample)
        .await
        .context("host stats sampler panicked")
}

fn sample() -> HostStats {
    let mut sys = System::new();
    sys.refresh_cpu();
    std::thread::sleep(CPU_SAMPLE_INTERVAL);
    sys.refresh_cpu();
    sys.refresh_memory();
    sys.refresh_disks_list();
    sys.refresh_disks();

    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();

    let root = sys
        .disks()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"));
    let (disk_total, disk_available) = match root {
        Some(disk) => (disk.total_space(), disk.available_space()),
        None => sys.disks().iter().fold((0, 0), |(total, avail), disk| {
            (total + disk.total_space(), avail + disk.available_space())
        }),
    };

    HostStats {
        cpu_usage: sys.global_cpu_info().cpu_usage(),
        memory: MemoryStats {
            total: total_memory,
            used: used_memory,
            percent: percent(used_memory, total_memory),
        },
        disk: DiskStats {
            total: disk_total,
            available: disk_available,
            percent: percent(disk_total.saturating_sub(disk_available), disk_total),
        },
        platform: os_family(std::env::consts::OS).to_string(),
    }
}

/// OS family as `uname -s` spells it, not the distribution name.
fn os_family(os: &str) -> &str {
    match os {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "Windows",
        "freebsd" => "FreeBSD",
        other => other,
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let ratio = part as f64 / whole as f64 * 100.0;
    (ratio * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_and_handles_empty_totals() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 3), 33.3);
        assert_eq!(percent(4, 4), 100.0);
    }

    #[test]
    fn platform_is_the_os_family() {
        assert_eq!(os_family("linux"), "Linux");
        assert_eq!(os_family("macos"), "Darwin");
        assert_eq!(os_family("haiku"), "haiku");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn reports_linux_rather_than_a_distribution() {
        assert_eq!(collect().await.unwrap().platform, "Linux");
    }

    #[tokio::test]
    async fn collects_a_plausible_snapshot() {
        let stats = collect().await.unwrap();
        assert!(!stats.platform.is_empty());
        assert!(stats.memory.percent >= 0.0 && stats.memory.percent <= 100.0);
        assert!(stats.disk.percent >= 0.0 && stats.disk.percent <= 100.0);
    }
}
