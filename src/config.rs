//! Agent configuration, loaded from JSON with per-section defaults.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Data directory (encrypted store, refiner model)
    pub data_dir: PathBuf,
    /// Host metric sampling
    pub collectors: CollectorsConfig,
    /// Normalizer + isolation forest parameters
    pub engine: EngineConfig,
    /// Risk level thresholds
    pub risk: RiskConfig,
    /// Auto-optimizer thresholds
    pub optimizer: OptimizerConfig,
    /// Sequence refiner (optional trend signal)
    pub refiner: RefinerConfig,
    /// Local store retention
    pub storage: StorageConfig,
    /// Alert channel
    pub alert: AlertConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    /// Daemon cycle period (seconds); 0 runs a single cycle
    pub sample_interval_secs: u64,
    /// CPU averaging window (milliseconds)
    pub cpu_window_ms: u64,
    /// A process above this CPU percent counts as high-CPU
    pub high_cpu_process_percent: f32,
    /// A process above this share of total RAM (percent) counts as high-memory
    pub high_memory_process_percent: f64,
    /// Mount point whose usage is reported as `disk_percent`
    pub disk_mount: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum history rows before the model is fitted
    pub min_fit_samples: usize,
    /// History rows pulled from the store per refit
    pub history_limit: usize,
    /// Refit cadence in daemon cycles
    pub refit_every_cycles: u64,
    /// Isolation trees in the ensemble
    pub trees: usize,
    /// Sub-sample size per tree
    pub max_samples: usize,
    /// Expected anomaly proportion in the training data
    pub contamination: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Score at or above this is high risk (0.0–1.0)
    pub high_threshold: f64,
    /// Score at or above this is medium risk
    pub medium_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Run the optimizer automatically at the end of each cycle
    pub auto_enabled: bool,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
    pub process_count: f64,
    /// How many processes the CPU action surfaces
    pub top_processes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerConfig {
    pub enabled: bool,
    /// Persisted model; relative paths resolve against `data_dir`
    pub model_path: PathBuf,
    /// Labeled samples required before training
    pub min_samples: usize,
    pub sequence_len: usize,
    pub hidden: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Training cadence in daemon cycles
    pub train_every_cycles: u64,
    /// Labeled rows pulled from the store per training run
    pub history_limit: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Rows older than this are pruned from every table; 0 keeps everything
    pub retention_days: u32,
    /// Prune cadence in daemon cycles
    pub prune_every_cycles: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    /// Webhook URL; without one alerts go to the log
    pub endpoint: Option<String>,
    /// Risk score at or above this triggers an alert
    pub threshold: f64,
    /// Minimum seconds between two alerts
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".autosense"),
            collectors: CollectorsConfig::default(),
            engine: EngineConfig::default(),
            risk: RiskConfig::default(),
            optimizer: OptimizerConfig::default(),
            refiner: RefinerConfig::default(),
            storage: StorageConfig::default(),
            alert: AlertConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 60,
            cpu_window_ms: 1000,
            high_cpu_process_percent: 10.0,
            high_memory_process_percent: 5.0,
            disk_mount: PathBuf::from("/"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_fit_samples: 5,
            history_limit: 50,
            refit_every_cycles: 10,
            trees: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.6,
            medium_threshold: 0.3,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            auto_enabled: false,
            memory_percent: 70.0,
            cpu_percent: 70.0,
            disk_percent: 80.0,
            process_count: 150.0,
            top_processes: 10,
        }
    }
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: PathBuf::from("refiner.json"),
            min_samples: 50,
            sequence_len: 10,
            hidden: 16,
            epochs: 30,
            learning_rate: 0.05,
            batch_size: 32,
            train_every_cycles: 60,
            history_limit: 500,
            seed: 42,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            prune_every_cycles: 60,
        }
    }
}

impl StorageConfig {
    /// Oldest timestamp to keep as of `now`, or `None` when retention is off
    /// (or reaches past the representable range).
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.retention_days == 0 {
            return None;
        }
        now.checked_sub_signed(Duration::days(i64::from(self.retention_days)))
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            threshold: 0.7,
            cooldown_secs: 3600,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl AgentConfig {
    /// Load from JSON file if present; otherwise return default
    pub fn load(path: &std::path::Path) -> Self {
        if path.exists() {
            if let Ok(data) = std::fs::read_to_string(path) {
                if let Ok(c) = serde_json::from_str::<AgentConfig>(&data) {
                    return c;
                }
            }
        }
        Self::default()
    }

    /// Refiner model location with relative paths anchored in `data_dir`
    pub fn refiner_model_path(&self) -> PathBuf {
        if self.refiner.model_path.is_absolute() {
            self.refiner.model_path.clone()
        } else {
            self.data_dir.join(&self.refiner.model_path)
        }
    }
}
