//! JSON log lines: one JSON object per line (ndjson) for ingestion and audit.

use serde::Serialize;
use std::io::Write;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Flat summary of one prediction for audit output.
#[derive(Serialize)]
pub struct PredictionLine<'a> {
    pub ts: String,
    pub prediction_id: &'a str,
    pub risk_score: f64,
    pub risk_level: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_score: Option<f64>,
    pub is_ai_fitted: bool,
    pub explanation: &'a str,
    pub recommendations: &'a [String],
}

impl<'a> From<&'a crate::risk::RiskPrediction> for PredictionLine<'a> {
    fn from(p: &'a crate::risk::RiskPrediction) -> Self {
        Self {
            ts: p.timestamp.to_rfc3339(),
            prediction_id: &p.id,
            risk_score: p.risk_score,
            risk_level: p.risk_level.as_str(),
            trend_score: p.trend_score,
            is_ai_fitted: p.is_ai_fitted,
            explanation: &p.explanation,
            recommendations: &p.recommendations,
        }
    }
}

/// Process-wide tracing setup for the agent binary.
pub struct StructuredLogger;

impl StructuredLogger {
    /// `RUST_LOG` overrides `level`. With `json`, every event is one ndjson
    /// line on stdout; otherwise plain text. A second call leaves the first
    /// subscriber in place.
    pub fn init(json: bool, level: &str) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let registry = tracing_subscriber::registry().with(filter);
        let installed = if json {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_span_list(false)
                        .with_writer(std::io::stdout),
                )
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
                .try_init()
        };
        if installed.is_err() {
            tracing::debug!("tracing subscriber already installed");
        }
    }

    /// Write `line` as one JSON object plus newline, bypassing the level
    /// filter. One-shot runs use this for the prediction audit line.
    pub fn emit_json(line: &impl Serialize, w: &mut impl Write) {
        match serde_json::to_string(line) {
            Ok(json) => {
                let _ = writeln!(w, "{}", json);
            }
            Err(e) => tracing::warn!(error = %e, "audit line not serializable"),
        }
    }
}
