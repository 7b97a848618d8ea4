//! Host sampling.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tracing::debug;

use crate::error::MonitorError;

/// One reading of host resource usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// Cumulative bytes sent over all interfaces.
    pub network_sent: u64,
    /// Cumulative bytes received over all interfaces.
    pub network_recv: u64,
    /// Threads in this process.
    pub active_threads: usize,
}

/// Source of host readings.
pub trait SystemSampler: Send {
    fn sample(&mut self) -> Result<SystemUsage, MonitorError>;
}

/// Sampler backed by `sysinfo`.
pub struct SysinfoSampler {
    system: System,
    disk_mount: PathBuf,
}

impl SysinfoSampler {
    /// Sampler that reports usage of the disk mounted at `/`.
    pub fn new() -> Self {
        Self::with_disk_mount("/")
    }

    /// Sampler that reports usage of the disk holding `mount`.
    pub fn with_disk_mount(mount: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu();
        system.refresh_disks_list();
        system.refresh_networks_list();
        Self {
            system,
            disk_mount: mount.into(),
        }
    }

    fn disk_percent(&self) -> f64 {
        let disk = self
            .system
            .disks()
            .iter()
            .filter(|d| self.disk_mount.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len());

        match disk {
            Some(disk) if disk.total_space() > 0 => {
                let used = disk.total_space().saturating_sub(disk.available_space());
                used as f64 / disk.total_space() as f64 * 100.0
            }
            _ => {
                debug!(mount = %self.disk_mount.display(), "No disk found for mount point");
                0.0
            }
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&mut self) -> Result<SystemUsage, MonitorError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_disks();
        self.system.refresh_networks();

        let total_memory = self.system.total_memory();
        if total_memory == 0 {
            return Err(MonitorError::MetricsCollection(
                "host memory information unavailable".to_string(),
            ));
        }
        let memory_percent = self.system.used_memory() as f64 / total_memory as f64 * 100.0;

        let (network_sent, network_recv) = self
            .system
            .networks()
            .iter()
            .fold((0u64, 0u64), |(sent, recv), (_, data)| {
                (
                    sent.saturating_add(data.total_transmitted()),
                    recv.saturating_add(data.total_received()),
                )
            });

        Ok(SystemUsage {
            cpu_percent: f64::from(self.system.global_cpu_info().cpu_usage()),
            memory_percent,
            disk_percent: self.disk_percent(),
            network_sent,
            network_recv,
            active_threads: thread_count(),
        })
    }
}

#[cfg(target_os = "linux")]
fn thread_count() -> usize {
    std::fs::read_dir("/proc/self/task")
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn thread_count() -> usize {
    0
}
