// SPDX-License-Identifier: MIT
//! Host and process readings backed by `sysinfo`.
use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};
use tracing::warn;

/// One sample of host and process usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: Option<f64>,
    pub process_cpu_percent: f64,
    pub process_rss_bytes: u64,
    pub process_virtual_bytes: u64,
}

/// Mount point with its capacity, as seen by [`disk_usage`].
#[derive(Debug, Clone)]
pub struct MountUsage {
    pub mount_point: PathBuf,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
    disk_path: PathBuf,
}

impl SystemSampler {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "process readings unavailable");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
            disk_path: disk_path.into(),
        }
    }

    /// Take a fresh sample.
    ///
    /// CPU figures are deltas since the previous call, so the very first sample
    /// reports 0% CPU.
    pub fn refresh(&mut self) -> SystemSnapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let mut snapshot = SystemSnapshot {
            cpu_percent: self.system.global_cpu_usage() as f64,
            memory_percent: percent(self.system.used_memory(), self.system.total_memory()),
            disk_percent: disk_usage(&self.disk_path, &mounts()),
            ..SystemSnapshot::default()
        };

        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                snapshot.process_cpu_percent = process.cpu_usage() as f64;
                snapshot.process_rss_bytes = process.memory();
                snapshot.process_virtual_bytes = process.virtual_memory();
            }
        }
        snapshot
    }
}

fn mounts() -> Vec<MountUsage> {
    Disks::new_with_refreshed_list()
        .iter()
        .map(|disk| MountUsage {
            mount_point: disk.mount_point().to_path_buf(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
        .collect()
}

/// `used / total` as a percentage; 0 when `total` is 0.
pub fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64 * 100.0
}

/// Usage of the mount holding `path`: the mount whose mount point is the
/// longest prefix of `path`.
pub fn disk_usage(path: &Path, mounts: &[MountUsage]) -> Option<f64> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.components().count())
        .map(|m| {
            percent(
                m.total_bytes.saturating_sub(m.available_bytes),
                m.total_bytes,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(path: &str, total: u64, available: u64) -> MountUsage {
        MountUsage {
            mount_point: PathBuf::from(path),
            total_bytes: total,
            available_bytes: available,
        }
    }

    #[test]
    fn percent_handles_empty_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }

    #[test]
    fn longest_mount_prefix_wins() {
        let mounts = vec![
            mount("/", 1000, 900),
            mount("/var", 200, 50),
            mount("/var/lib/sybase", 100, 10),
        ];
        assert_eq!(disk_usage(Path::new("/"), &mounts), Some(10.0));
        assert_eq!(disk_usage(Path::new("/var/log"), &mounts), Some(75.0));
        assert_eq!(
            disk_usage(Path::new("/var/lib/sybase/data"), &mounts),
            Some(90.0)
        );
        // `/variable` is not under `/var`
        assert_eq!(disk_usage(Path::new("/variable"), &mounts), Some(10.0));
    }

    #[test]
    fn no_matching_mount() {
        assert_eq!(disk_usage(Path::new("/data"), &[mount("/mnt", 1, 1)]), None);
        assert_eq!(disk_usage(Path::new("/data"), &[]), None);
    }

    #[test]
    fn sampler_reports_own_process() {
        let mut sampler = SystemSampler::new("/");
        let snapshot = sampler.refresh();
        assert!(snapshot.memory_percent >= 0.0 && snapshot.memory_percent <= 100.0);
        assert!(snapshot.process_rss_bytes > 0);
    }
}
