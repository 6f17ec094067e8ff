//! Host metric collection (cross-platform via sysinfo).
//!
//! [`HostCollector`] produces one [`FeatureVector`] per call. Collection blocks
//! for the CPU averaging window so readings are interval averages rather than
//! instantaneous spikes.

mod network;
mod process;

pub use network::NetworkCounters;
pub use process::{ProcessCensus, ProcessSample};

use crate::config::CollectorsConfig;
use crate::error::{AgentError, Result};
use crate::features::{keys, FeatureVector};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use sysinfo::{Disks, System};
use tracing::{debug, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Anything that can produce a host snapshot.
pub trait FeatureSource: Send + Sync {
    /// Returns an empty vector when the snapshot could not be taken.
    fn collect(&self) -> FeatureVector;
}

/// Snapshot producer backed by live OS state.
pub struct HostCollector {
    config: CollectorsConfig,
    sys: Mutex<System>,
}

impl HostCollector {
    pub fn new(config: CollectorsConfig) -> Self {
        Self {
            config,
            sys: Mutex::new(System::new()),
        }
    }

    pub fn config(&self) -> &CollectorsConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, System>> {
        self.sys
            .lock()
            .map_err(|_| AgentError::Collection("system handle poisoned".into()))
    }

    fn cpu_window(&self) -> Duration {
        Duration::from_millis(self.config.cpu_window_ms).max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
    }

    /// Refresh CPU and process tables twice, one window apart, so usage
    /// figures cover the whole window.
    fn sample_window(&self, sys: &mut System) {
        sys.refresh_cpu();
        sys.refresh_processes();
        std::thread::sleep(self.cpu_window());
        sys.refresh_cpu();
        sys.refresh_processes();
        sys.refresh_memory();
    }

    /// Take a full snapshot, reporting why it failed.
    pub fn try_collect(&self) -> Result<FeatureVector> {
        let mut sys = self.lock()?;
        self.sample_window(&mut sys);

        let total_memory = sys.total_memory();
        if total_memory == 0 {
            return Err(AgentError::Collection("total memory reported as zero".into()));
        }
        let available = sys.available_memory();
        let memory_percent =
            (total_memory.saturating_sub(available) as f64 / total_memory as f64) * 100.0;
        let cpu_percent = f64::from(sys.global_cpu_info().cpu_usage()).clamp(0.0, 100.0);

        let census = ProcessCensus::from_system(
            &sys,
            self.config.high_cpu_process_percent,
            self.config.high_memory_process_percent,
        );
        drop(sys);

        let (disk_percent, disk_free_gb) = self.disk_usage();
        let net = NetworkCounters::read();

        let cpu_load_avg = if cfg!(windows) {
            cpu_percent / 100.0
        } else {
            System::load_average().one
        };

        debug!(
            cpu_percent,
            memory_percent,
            disk_percent,
            processes = census.total,
            "host snapshot"
        );

        Ok(FeatureVector::empty()
            .with(keys::CPU_PERCENT, cpu_percent)
            .with(keys::MEMORY_PERCENT, memory_percent.clamp(0.0, 100.0))
            .with(keys::MEMORY_AVAILABLE_GB, available as f64 / BYTES_PER_GB)
            .with(keys::DISK_PERCENT, disk_percent)
            .with(keys::DISK_FREE_GB, disk_free_gb)
            .with(keys::NETWORK_SENT_MB, net.sent_mb())
            .with(keys::NETWORK_RECV_MB, net.recv_mb())
            .with(keys::PROCESS_COUNT, census.total as f64)
            .with(keys::HIGH_CPU_PROCESSES, census.high_cpu as f64)
            .with(keys::HIGH_MEMORY_PROCESSES, census.high_memory as f64)
            .with(keys::CPU_LOAD_AVG, cpu_load_avg))
    }

    /// Usage of the configured mount; falls back to the largest disk, then to
    /// zeros when the platform reports no disks at all.
    fn disk_usage(&self) -> (f64, f64) {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .iter()
            .find(|d| d.mount_point() == self.config.disk_mount.as_path())
            .or_else(|| disks.iter().max_by_key(|d| d.total_space()));
        match disk {
            Some(d) if d.total_space() > 0 => {
                let total = d.total_space() as f64;
                let free = d.available_space() as f64;
                let used = ((total - free) / total * 100.0).clamp(0.0, 100.0);
                (used, free / BYTES_PER_GB)
            }
            _ => {
                warn!(mount = %self.config.disk_mount.display(), "no disk usage available");
                (0.0, 0.0)
            }
        }
    }

    /// Current memory usage percent, without the CPU window.
    pub fn memory_percent(&self) -> Result<f64> {
        let mut sys = self.lock()?;
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(AgentError::Collection("total memory reported as zero".into()));
        }
        Ok((total.saturating_sub(sys.available_memory()) as f64 / total as f64) * 100.0)
    }

    /// Processes over the high-CPU threshold, busiest first.
    pub fn high_cpu_processes(&self, limit: usize) -> Result<Vec<ProcessSample>> {
        let mut sys = self.lock()?;
        self.sample_window(&mut sys);
        Ok(process::top_by_cpu(
            &sys,
            self.config.high_cpu_process_percent,
            limit,
        ))
    }

    pub fn process_count(&self) -> Result<usize> {
        let mut sys = self.lock()?;
        sys.refresh_processes();
        Ok(sys.processes().len())
    }
}

impl FeatureSource for HostCollector {
    fn collect(&self) -> FeatureVector {
        match self.try_collect() {
            Ok(fv) => fv,
            Err(e) => {
                warn!(error = %e, "metric collection failed");
                FeatureVector::empty()
            }
        }
    }
}

/// A fixed snapshot, for replaying stored metrics or driving tests.
impl FeatureSource for FeatureVector {
    fn collect(&self) -> FeatureVector {
        self.clone()
    }
}
