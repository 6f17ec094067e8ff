//! Degradation risk: anomaly-model scoring, heuristic fallback, and the
//! rule-based explanation/recommendation layer.

mod engine;
pub mod explain;

pub use engine::{heuristic_score, RiskEngine};

use crate::config::RiskConfig;
use crate::features::FeatureVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    /// The snapshot could not be taken; distinct from a genuinely low reading.
    Unknown,
}

impl RiskLevel {
    pub fn from_score(score: f64, config: &RiskConfig) -> Self {
        if score >= config.high_threshold {
            RiskLevel::High
        } else if score >= config.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPrediction {
    pub id: String,
    /// In [0, 1], rounded to 3 decimals
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub explanation: String,
    pub recommendations: Vec<String>,
    pub features: FeatureVector,
    pub timestamp: DateTime<Utc>,
    /// Whether the anomaly model was fitted when this was scored
    pub is_ai_fitted: bool,
    /// Next-step estimate from the sequence refiner, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_score: Option<f64>,
}

impl RiskPrediction {
    /// The "don't know" record for a failed collection.
    pub fn unknown(explanation: impl Into<String>, is_ai_fitted: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            risk_score: 0.5,
            risk_level: RiskLevel::Unknown,
            explanation: explanation.into(),
            recommendations: Vec::new(),
            features: FeatureVector::empty(),
            timestamp: Utc::now(),
            is_ai_fitted,
            trend_score: None,
        }
    }

    pub fn with_trend(mut self, trend_score: Option<f64>) -> Self {
        self.trend_score = trend_score.map(round3);
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.risk_level == RiskLevel::Unknown
    }
}

pub(crate) fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
