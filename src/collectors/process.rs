//! Process census: totals plus threshold-based high-CPU / high-memory counts.

use serde::{Deserialize, Serialize};
use sysinfo::System;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCensus {
    pub total: usize,
    pub high_cpu: usize,
    pub high_memory: usize,
}

/// One process as surfaced by the CPU optimization action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

impl ProcessCensus {
    /// Count processes in an already-refreshed process table.
    pub fn from_system(sys: &System, cpu_threshold: f32, memory_threshold_percent: f64) -> Self {
        let total_memory = sys.total_memory() as f64;
        let mut census = ProcessCensus::default();
        for proc_ in sys.processes().values() {
            census.total += 1;
            if proc_.cpu_usage() > cpu_threshold {
                census.high_cpu += 1;
            }
            if total_memory > 0.0
                && proc_.memory() as f64 / total_memory * 100.0 > memory_threshold_percent
            {
                census.high_memory += 1;
            }
        }
        census
    }
}

pub(crate) fn top_by_cpu(sys: &System, cpu_threshold: f32, limit: usize) -> Vec<ProcessSample> {
    let mut out: Vec<ProcessSample> = sys
        .processes()
        .iter()
        .filter(|(_, p)| p.cpu_usage() > cpu_threshold)
        .map(|(pid, p)| ProcessSample {
            pid: pid.as_u32(),
            name: p.name().to_string(),
            cpu_percent: p.cpu_usage(),
            memory_mb: p.memory() as f64 / (1024.0 * 1024.0),
        })
        .collect();
    out.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    out.truncate(limit);
    out
}
