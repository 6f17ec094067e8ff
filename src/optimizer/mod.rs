//! Threshold-driven mitigation: pick one action per metric over its limit,
//! run it through an [`ActionExecutor`], and report every outcome.
//!
//! A failing action is recorded and the remaining ones still run; `success`
//! on the result only says the snapshot was taken and dispatch completed.

mod actions;

pub use actions::HostActions;

use crate::collectors::{FeatureSource, ProcessSample};
use crate::config::OptimizerConfig;
use crate::error::ActionError;
use crate::features::{keys, FeatureVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationKind {
    RamBoost,
    CpuOptimization,
    DiskCleanup,
    ProcessCleanup,
}

impl OptimizationKind {
    /// Dispatch order.
    pub const ALL: [OptimizationKind; 4] = [
        OptimizationKind::RamBoost,
        OptimizationKind::CpuOptimization,
        OptimizationKind::DiskCleanup,
        OptimizationKind::ProcessCleanup,
    ];

    /// Human-readable name reported in `optimizations_performed`.
    pub fn label(&self) -> &'static str {
        match self {
            OptimizationKind::RamBoost => "RAM Boost",
            OptimizationKind::CpuOptimization => "CPU Optimization",
            OptimizationKind::DiskCleanup => "Disk Cleanup",
            OptimizationKind::ProcessCleanup => "Process Cleanup",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationKind::RamBoost => "ram_boost",
            OptimizationKind::CpuOptimization => "cpu_optimization",
            OptimizationKind::DiskCleanup => "disk_cleanup",
            OptimizationKind::ProcessCleanup => "process_cleanup",
        }
    }

    /// The metric and threshold that trigger this action.
    fn trigger(&self, config: &OptimizerConfig) -> (&'static str, f64) {
        match self {
            OptimizationKind::RamBoost => (keys::MEMORY_PERCENT, config.memory_percent),
            OptimizationKind::CpuOptimization => (keys::CPU_PERCENT, config.cpu_percent),
            OptimizationKind::DiskCleanup => (keys::DISK_PERCENT, config.disk_percent),
            OptimizationKind::ProcessCleanup => (keys::PROCESS_COUNT, config.process_count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryReclaim {
    pub memory_before: f64,
    pub memory_after: f64,
    pub freed_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighCpuReport {
    pub high_cpu_processes: Vec<ProcessSample>,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskCleanupPlan {
    pub recommendation: String,
    pub suggested_actions: Vec<String>,
    /// Estimated bytes in temp/cache locations
    pub reclaimable_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub current_processes: usize,
    pub recommendation: String,
}

/// Outcome of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionReport {
    RamBoost(MemoryReclaim),
    CpuOptimization(HighCpuReport),
    DiskCleanup(DiskCleanupPlan),
    ProcessCleanup(ProcessReport),
    Failed { error: String },
}

impl ActionReport {
    pub fn success(&self) -> bool {
        !matches!(self, ActionReport::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub success: bool,
    pub optimizations_performed: Vec<String>,
    pub results: BTreeMap<OptimizationKind, ActionReport>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Host-side mitigations. Each call stands alone; one failing says nothing
/// about the others.
pub trait ActionExecutor: Send + Sync {
    fn reclaim_memory(&self) -> Result<MemoryReclaim, ActionError>;
    fn list_high_cpu_processes(&self, limit: usize) -> Result<Vec<ProcessSample>, ActionError>;
    fn suggest_disk_cleanup(&self) -> Result<DiskCleanupPlan, ActionError>;
    fn count_processes(&self) -> Result<usize, ActionError>;
}

pub struct AutoOptimizer {
    config: OptimizerConfig,
    executor: Arc<dyn ActionExecutor>,
}

impl AutoOptimizer {
    pub fn new(config: OptimizerConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Actions whose metric is strictly above its threshold, in dispatch order.
    pub fn planned_actions(&self, features: &FeatureVector) -> Vec<OptimizationKind> {
        OptimizationKind::ALL
            .into_iter()
            .filter(|kind| {
                let (key, threshold) = kind.trigger(&self.config);
                features.get(key) > threshold
            })
            .collect()
    }

    fn run(&self, kind: OptimizationKind) -> Result<ActionReport, ActionError> {
        Ok(match kind {
            OptimizationKind::RamBoost => ActionReport::RamBoost(self.executor.reclaim_memory()?),
            OptimizationKind::CpuOptimization => ActionReport::CpuOptimization(HighCpuReport {
                high_cpu_processes: self
                    .executor
                    .list_high_cpu_processes(self.config.top_processes)?,
                recommendation: "Consider closing top CPU-consuming processes".to_string(),
            }),
            OptimizationKind::DiskCleanup => {
                ActionReport::DiskCleanup(self.executor.suggest_disk_cleanup()?)
            }
            OptimizationKind::ProcessCleanup => ActionReport::ProcessCleanup(ProcessReport {
                current_processes: self.executor.count_processes()?,
                recommendation: "Review startup programs and disable unnecessary ones"
                    .to_string(),
            }),
        })
    }

    /// Act on an already-collected snapshot.
    pub fn optimize_snapshot(&self, features: &FeatureVector) -> OptimizationResult {
        if features.is_empty() {
            warn!("optimizer skipped: no host snapshot");
            return OptimizationResult {
                success: false,
                optimizations_performed: Vec::new(),
                results: BTreeMap::new(),
                timestamp: Utc::now(),
                error: Some("Unable to collect system metrics".to_string()),
            };
        }

        let mut performed = Vec::new();
        let mut results = BTreeMap::new();
        for kind in self.planned_actions(features) {
            let report = match self.run(kind) {
                Ok(r) => r,
                Err(e) => {
                    warn!(action = kind.as_str(), error = %e, "optimization action failed");
                    ActionReport::Failed {
                        error: e.to_string(),
                    }
                }
            };
            performed.push(kind.label().to_string());
            results.insert(kind, report);
        }
        info!(actions = ?performed, "optimization pass complete");

        OptimizationResult {
            success: true,
            optimizations_performed: performed,
            results,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Collect a fresh snapshot from `source` and act on it.
    pub fn auto_optimize(&self, source: &dyn FeatureSource) -> OptimizationResult {
        self.optimize_snapshot(&source.collect())
    }
}
