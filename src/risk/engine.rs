//! Combines the anomaly model with a heuristic fallback into a bounded risk
//! score and level.
//!
//! Fitted state (normalizer + forest) lives behind one `Arc` swapped under a
//! write lock. Fits build the replacement outside the lock, so scorers see
//! either the old state or the new one, never a mix. A separate guard allows
//! a single fit at a time per engine.

use super::{explain, round3, RiskLevel, RiskPrediction};
use crate::collectors::FeatureSource;
use crate::config::{EngineConfig, RiskConfig};
use crate::error::{AgentError, Result};
use crate::features::{keys, FeatureVector, HistoryRecord, Normalizer, SCORING_KEYS};
use crate::model::{IsolationForest, IsolationForestParams};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct FittedState {
    normalizer: Normalizer,
    forest: IsolationForest,
    samples: usize,
    fitted_at: DateTime<Utc>,
}

/// Coarse score used before any history exists or when model scoring fails.
/// Non-finite readings give the neutral 0.5.
pub fn heuristic_score(features: &FeatureVector) -> f64 {
    let cpu = features.get(keys::CPU_PERCENT);
    let memory = features.get(keys::MEMORY_PERCENT);
    let score = cpu / 200.0 + memory / 200.0;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Snapshots that cannot be scored: nothing collected, or the readings the
/// heuristic depends on are not numbers.
fn unscorable(features: &FeatureVector) -> Option<&'static str> {
    if features.is_empty() {
        return Some("Unable to collect system metrics");
    }
    let core_finite = [keys::CPU_PERCENT, keys::MEMORY_PERCENT]
        .iter()
        .all(|k| features.get(k).is_finite());
    if !core_finite {
        return Some("System metrics contained invalid readings");
    }
    None
}

pub struct RiskEngine {
    engine: EngineConfig,
    risk: RiskConfig,
    state: RwLock<Option<Arc<FittedState>>>,
    fit_guard: Mutex<()>,
}

impl RiskEngine {
    pub fn new(engine: EngineConfig, risk: RiskConfig) -> Self {
        Self {
            engine,
            risk,
            state: RwLock::new(None),
            fit_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.risk
    }

    fn current(&self) -> Option<Arc<FittedState>> {
        match self.state.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.current().is_some()
    }

    /// Samples behind the current fit, if any.
    pub fn fitted_samples(&self) -> Option<usize> {
        self.current().map(|s| s.samples)
    }

    pub fn fitted_at(&self) -> Option<DateTime<Utc>> {
        self.current().map(|s| s.fitted_at)
    }

    /// Refit normalizer and forest from `history`, replacing the previous fit
    /// only when both succeed. Empty (failed) snapshots are skipped.
    pub fn fit_history(&self, history: &[FeatureVector]) -> Result<usize> {
        let _guard = match self.fit_guard.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let rows: Vec<[f64; 6]> = history
            .iter()
            .filter(|fv| !fv.is_empty())
            .map(FeatureVector::scoring_row)
            .collect();
        let need = self.engine.min_fit_samples.max(1);
        if rows.len() < need {
            return Err(AgentError::InsufficientHistory {
                got: rows.len(),
                need,
            });
        }

        let x = Array2::from_shape_fn((rows.len(), SCORING_KEYS.len()), |(i, j)| rows[i][j]);
        let normalizer = Normalizer::fit(&x, need)?;
        let scaled = normalizer.transform_matrix(&x)?;
        let forest = IsolationForest::fit(&scaled, &IsolationForestParams::from(&self.engine))?;

        let fitted = Arc::new(FittedState {
            normalizer,
            forest,
            samples: rows.len(),
            fitted_at: Utc::now(),
        });
        match self.state.write() {
            Ok(mut g) => *g = Some(fitted),
            Err(poisoned) => *poisoned.into_inner() = Some(fitted),
        }
        info!(samples = rows.len(), "anomaly model fitted");
        Ok(rows.len())
    }

    /// Boolean form of [`fit_history`](Self::fit_history): true when the
    /// model was (re)fitted, false when history was insufficient or unusable.
    pub fn ensure_fitted(&self, history: &[FeatureVector]) -> bool {
        match self.fit_history(history) {
            Ok(_) => true,
            Err(e @ AgentError::InsufficientHistory { .. }) => {
                debug!(error = %e, "anomaly model not fitted");
                false
            }
            Err(e) => {
                warn!(error = %e, "anomaly model fit failed");
                false
            }
        }
    }

    pub fn ensure_fitted_from_records(&self, records: &[HistoryRecord]) -> bool {
        let history: Vec<FeatureVector> = records.iter().map(|r| r.features.clone()).collect();
        self.ensure_fitted(&history)
    }

    /// Forest decision value for `features`; more negative is more anomalous.
    pub fn raw_anomaly_score(&self, features: &FeatureVector) -> Result<f64> {
        let state = self.current().ok_or(AgentError::NotFitted)?;
        let z = state.normalizer.transform(&features.scoring_row())?;
        state.forest.decision_function(z.view())
    }

    /// Bounded score and level. An empty snapshot, or one with a non-finite
    /// CPU or memory reading, yields `(0.5, Unknown)`.
    pub fn score(&self, features: &FeatureVector) -> (f64, RiskLevel) {
        if unscorable(features).is_some() {
            return (0.5, RiskLevel::Unknown);
        }
        let score = match self.raw_anomaly_score(features) {
            Ok(raw) => ((1.0 - raw) / 2.0).clamp(0.0, 1.0),
            Err(AgentError::NotFitted) => heuristic_score(features),
            Err(e) => {
                debug!(error = %e, "model scoring failed; using heuristic");
                heuristic_score(features)
            }
        };
        (score, RiskLevel::from_score(score, &self.risk))
    }

    /// Score, explain and recommend for one snapshot.
    pub fn predict(&self, features: FeatureVector) -> RiskPrediction {
        let fitted = self.is_fitted();
        if let Some(reason) = unscorable(&features) {
            return RiskPrediction::unknown(reason, fitted);
        }
        let (score, level) = self.score(&features);
        RiskPrediction {
            id: Uuid::new_v4().to_string(),
            risk_score: round3(score),
            risk_level: level,
            explanation: explain::explain(&features, score, level),
            recommendations: explain::recommend(&features, score),
            features,
            timestamp: Utc::now(),
            is_ai_fitted: fitted,
            trend_score: None,
        }
    }

    /// Collect a snapshot from `source` and score it.
    pub fn predict_degradation_risk(&self, source: &dyn FeatureSource) -> RiskPrediction {
        self.predict(source.collect())
    }
}
