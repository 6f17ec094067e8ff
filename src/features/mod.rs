//! Named host-metric feature vectors and the statistics built over them.

mod normalizer;
mod window;

pub use normalizer::Normalizer;
pub use window::FeatureWindow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric names produced by the collector.
pub mod keys {
    pub const CPU_PERCENT: &str = "cpu_percent";
    pub const MEMORY_PERCENT: &str = "memory_percent";
    pub const MEMORY_AVAILABLE_GB: &str = "memory_available_gb";
    pub const DISK_PERCENT: &str = "disk_percent";
    pub const DISK_FREE_GB: &str = "disk_free_gb";
    pub const NETWORK_SENT_MB: &str = "network_sent_mb";
    pub const NETWORK_RECV_MB: &str = "network_recv_mb";
    pub const PROCESS_COUNT: &str = "process_count";
    pub const HIGH_CPU_PROCESSES: &str = "high_cpu_processes";
    pub const HIGH_MEMORY_PROCESSES: &str = "high_memory_processes";
    pub const CPU_LOAD_AVG: &str = "cpu_load_avg";
}

/// Column order of the anomaly model's input rows.
pub const SCORING_KEYS: [&str; 6] = [
    keys::CPU_PERCENT,
    keys::MEMORY_PERCENT,
    keys::DISK_PERCENT,
    keys::PROCESS_COUNT,
    keys::HIGH_CPU_PROCESSES,
    keys::HIGH_MEMORY_PROCESSES,
];

/// Column order of the sequence refiner's input steps.
pub const TREND_KEYS: [&str; 3] = [keys::CPU_PERCENT, keys::MEMORY_PERCENT, keys::DISK_PERCENT];

/// One host snapshot: metric name to value. Empty means collection failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    /// The "unknown" snapshot returned when collection fails.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Value for `key`, 0.0 when absent.
    pub fn get(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }

    pub fn try_get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Model input row in [`SCORING_KEYS`] order.
    pub fn scoring_row(&self) -> [f64; 6] {
        SCORING_KEYS.map(|k| self.get(k))
    }

    /// Refiner input step in [`TREND_KEYS`] order.
    pub fn trend_step(&self) -> [f64; 3] {
        TREND_KEYS.map(|k| self.get(k))
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// One stored snapshot, optionally labeled with the risk score it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub ts: DateTime<Utc>,
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
}

impl HistoryRecord {
    pub fn new(features: FeatureVector, risk_score: Option<f64>) -> Self {
        Self {
            ts: Utc::now(),
            features,
            risk_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_read_as_zero() {
        let fv = FeatureVector::empty().with(keys::CPU_PERCENT, 42.0);
        assert_eq!(fv.get(keys::CPU_PERCENT), 42.0);
        assert_eq!(fv.get(keys::DISK_PERCENT), 0.0);
        assert_eq!(fv.try_get(keys::DISK_PERCENT), None);
    }

    #[test]
    fn scoring_row_follows_fixed_order() {
        let fv: FeatureVector = [
            (keys::HIGH_MEMORY_PROCESSES, 6.0),
            (keys::CPU_PERCENT, 1.0),
            (keys::PROCESS_COUNT, 4.0),
            (keys::MEMORY_PERCENT, 2.0),
            (keys::HIGH_CPU_PROCESSES, 5.0),
            (keys::DISK_PERCENT, 3.0),
            (keys::NETWORK_SENT_MB, 99.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(fv.scoring_row(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(fv.trend_step(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn serializes_as_flat_map() {
        let fv = FeatureVector::empty().with(keys::CPU_PERCENT, 12.5);
        let json = serde_json::to_string(&fv).unwrap();
        assert_eq!(json, r#"{"cpu_percent":12.5}"#);
    }
}
