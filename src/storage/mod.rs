//! Encrypted local storage for metric history, predictions and optimizer runs.

mod encrypted;

pub use encrypted::{OptimizationRecord, SecureStore};

use crate::error::Result;
use crate::features::HistoryRecord;
use crate::risk::RiskPrediction;

/// Supplies past snapshots, oldest first, for fitting.
pub trait HistorySource {
    fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>>;

    /// Only records carrying a risk score (refiner training data).
    fn labeled_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .recent_history(limit)?
            .into_iter()
            .filter(|r| r.risk_score.is_some())
            .collect())
    }
}

/// Durable destination for predictions.
pub trait PredictionSink {
    fn record_prediction(&self, prediction: &RiskPrediction) -> Result<()>;
}
