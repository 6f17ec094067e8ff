//! Alert channel: threshold check plus cooldown in front of a [`Notifier`].
//! The cooldown is stamped only after a successful dispatch, so a failed
//! delivery is retried on the next check.

use crate::config::AlertConfig;
use crate::error::AlertError;
use crate::features::{keys, FeatureVector};
use crate::risk::RiskPrediction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub subject: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    pub recommendations: Vec<String>,
    pub ts: DateTime<Utc>,
}

impl Alert {
    fn from_prediction(p: &RiskPrediction) -> Self {
        Self {
            subject: format!(
                "Critical System Alert - Risk Level: {}",
                p.risk_level.as_str().to_uppercase()
            ),
            message: p.explanation.clone(),
            risk_score: Some(p.risk_score),
            risk_level: Some(p.risk_level.as_str().to_string()),
            recommendations: p.recommendations.clone(),
            ts: Utc::now(),
        }
    }
}

/// Delivery transport for alerts.
pub trait Notifier: Send + Sync {
    fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// POSTs alerts as JSON to a webhook.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: &str) -> Result<Self, AlertError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let res = self.client.post(&self.url).json(alert).send()?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().unwrap_or_default();
            return Err(AlertError::Rejected { status, body });
        }
        Ok(())
    }
}

/// Writes alerts to the log; used when no endpoint is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        warn!(
            subject = %alert.subject,
            risk_score = ?alert.risk_score,
            message = %alert.message,
            "alert"
        );
        Ok(())
    }
}

/// Readings above this percent raise an immediate notice.
const CRITICAL_PERCENT: f64 = 90.0;

/// (notice kind, metric, label) for conditions reported outside the risk flow.
const CRITICAL_CONDITIONS: [(&str, &str, &str); 2] = [
    ("Critical Memory Usage", keys::MEMORY_PERCENT, "Memory usage"),
    ("Critical Disk Space", keys::DISK_PERCENT, "Disk usage"),
];

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Sent,
    BelowThreshold,
    CoolingDown,
    Failed,
}

pub struct AlertChannel {
    threshold: f64,
    cooldown: Duration,
    last_sent: Mutex<Option<Instant>>,
    /// Critical conditions already reported and not yet cleared
    active_critical: Mutex<BTreeSet<&'static str>>,
    notifier: Box<dyn Notifier>,
}

impl AlertChannel {
    pub fn new(config: &AlertConfig, notifier: Box<dyn Notifier>) -> Self {
        Self {
            threshold: config.threshold,
            cooldown: Duration::from_secs(config.cooldown_secs),
            last_sent: Mutex::new(None),
            active_critical: Mutex::new(BTreeSet::new()),
            notifier,
        }
    }

    /// Webhook when an endpoint is configured, log otherwise.
    pub fn from_config(config: &AlertConfig) -> Result<Self, AlertError> {
        let notifier: Box<dyn Notifier> = match config.endpoint.as_deref() {
            Some(url) => Box::new(WebhookNotifier::new(url)?),
            None => Box::new(LogNotifier),
        };
        Ok(Self::new(config, notifier))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn cooling_down(&self) -> bool {
        let last = *lock(&self.last_sent);
        last.map_or(false, |t| t.elapsed() < self.cooldown)
    }

    fn dispatch(&self, alert: &Alert) -> AlertOutcome {
        match self.notifier.send(alert) {
            Ok(()) => {
                info!(subject = %alert.subject, "alert sent");
                AlertOutcome::Sent
            }
            Err(e) => {
                warn!(error = %e, "alert delivery failed");
                AlertOutcome::Failed
            }
        }
    }

    /// Alert on `prediction` using the configured threshold.
    pub fn check(&self, prediction: &RiskPrediction) -> AlertOutcome {
        self.check_with_threshold(prediction, self.threshold)
    }

    pub fn check_with_threshold(&self, prediction: &RiskPrediction, threshold: f64) -> AlertOutcome {
        if self.cooling_down() {
            return AlertOutcome::CoolingDown;
        }
        if prediction.is_unknown() || prediction.risk_score < threshold {
            return AlertOutcome::BelowThreshold;
        }
        let outcome = self.dispatch(&Alert::from_prediction(prediction));
        if outcome == AlertOutcome::Sent {
            *lock(&self.last_sent) = Some(Instant::now());
        }
        outcome
    }

    /// Immediate alert outside the risk flow; neither checks nor starts the
    /// cooldown.
    pub fn notify_critical(&self, kind: &str, details: &str) -> AlertOutcome {
        self.dispatch(&Alert {
            subject: format!("CRITICAL: {}", kind),
            message: details.to_string(),
            risk_score: None,
            risk_level: None,
            recommendations: Vec::new(),
            ts: Utc::now(),
        })
    }

    /// Immediate notices for memory or disk above 90%. Each condition is
    /// reported once when it starts and re-arms after it clears; a failed
    /// send is retried on the next call. Empty snapshots change nothing.
    pub fn check_critical(&self, features: &FeatureVector) -> Vec<(&'static str, AlertOutcome)> {
        let mut out = Vec::new();
        if features.is_empty() {
            return out;
        }
        for (kind, key, label) in CRITICAL_CONDITIONS {
            let value = features.get(key);
            if value.is_nan() || value <= CRITICAL_PERCENT {
                lock(&self.active_critical).remove(kind);
                continue;
            }
            if lock(&self.active_critical).contains(kind) {
                continue;
            }
            let outcome = self.notify_critical(kind, &format!("{} is at {:.1}%", label, value));
            if outcome == AlertOutcome::Sent {
                lock(&self.active_critical).insert(kind);
            }
            out.push((kind, outcome));
        }
        out
    }
}
