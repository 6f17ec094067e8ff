//! AutoSense agent entrypoint: runs a single cycle or a daemon loop with a
//! configurable interval. Each cycle collects a host snapshot, refits the
//! anomaly model from stored history when due, scores and stores the
//! prediction, raises alerts, optionally auto-optimizes, and retrains the
//! trend refiner when enough labeled history exists.
//!
//! Pass `--optimize` to force an optimizer pass regardless of configuration.

use autosense_agent::{
    alert::{AlertChannel, AlertOutcome},
    collectors::{FeatureSource, HostCollector},
    config::AgentConfig,
    features::FeatureWindow,
    logging::{PredictionLine, StructuredLogger},
    model::SequenceRefiner,
    optimizer::{AutoOptimizer, HostActions},
    risk::RiskEngine,
    storage::{HistorySource, PredictionSink, SecureStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Runtime {
    config: AgentConfig,
    collector: Arc<HostCollector>,
    engine: RiskEngine,
    refiner: SequenceRefiner,
    window: FeatureWindow,
    optimizer: AutoOptimizer,
    alerts: Option<AlertChannel>,
    store: SecureStore,
    force_optimize: bool,
}

/// Device secret for the store key. In production: from Secure Enclave / Keystore.
fn store_secret() -> Vec<u8> {
    match std::env::var("AUTOSENSE_STORE_SECRET") {
        Ok(s) if !s.is_empty() => s.into_bytes(),
        _ => {
            let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string());
            format!("autosense-device:{}", host).into_bytes()
        }
    }
}

fn due(cycle: u64, every: u64) -> bool {
    every > 0 && cycle % every == 0
}

impl Runtime {
    fn refit_if_due(&self, cycle: u64) {
        if self.engine.is_fitted() && !due(cycle, self.config.engine.refit_every_cycles) {
            return;
        }
        match self.store.recent_history(self.config.engine.history_limit) {
            Ok(history) => {
                let fitted = self.engine.ensure_fitted_from_records(&history);
                debug!(cycle, samples = history.len(), fitted, "refit attempt");
            }
            Err(e) => warn!(error = %e, "history unavailable for refit"),
        }
    }

    fn prune_if_due(&self, cycle: u64) {
        if cycle != 1 && !due(cycle, self.config.storage.prune_every_cycles) {
            return;
        }
        let Some(cutoff) = self.config.storage.retention_cutoff(chrono::Utc::now()) else {
            return;
        };
        match self.store.prune_before(cutoff) {
            Ok(0) => {}
            Ok(removed) => info!(removed, cutoff = %cutoff, "store pruned"),
            Err(e) => warn!(error = %e, "store prune failed"),
        }
    }

    fn train_refiner_if_due(&self, cycle: u64) {
        if !self.config.refiner.enabled {
            return;
        }
        if self.refiner.is_available() && !due(cycle, self.config.refiner.train_every_cycles) {
            return;
        }
        let history = match self.store.labeled_history(self.config.refiner.history_limit) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "history unavailable for refiner");
                return;
            }
        };
        match self.refiner.train(&history) {
            Ok(true) => {
                let path = self.config.refiner_model_path();
                if let Err(e) = self.refiner.save(&path) {
                    warn!(path = %path.display(), error = %e, "refiner save failed");
                }
            }
            Ok(false) => debug!(labeled = history.len(), "refiner waiting for history"),
            Err(e) => warn!(error = %e, "refiner training failed"),
        }
    }

    fn run_one_cycle(&self, cycle: u64) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let features = self.collector.collect();
        self.refit_if_due(cycle);

        self.window.push(&features);
        let trend = if self.config.refiner.enabled {
            self.refiner.predict_next(&self.window.snapshot())
        } else {
            None
        };
        let prediction = self.engine.predict(features.clone()).with_trend(trend);

        let label = (!prediction.is_unknown()).then_some(prediction.risk_score);
        self.store.record_metrics(&features, label, prediction.timestamp)?;
        self.store.record_prediction(&prediction)?;
        info!(
            cycle,
            id = %prediction.id,
            score = prediction.risk_score,
            level = %prediction.risk_level,
            trend = ?prediction.trend_score,
            fitted = prediction.is_ai_fitted,
            "risk prediction"
        );
        if self.config.collectors.sample_interval_secs == 0 {
            StructuredLogger::emit_json(&PredictionLine::from(&prediction), &mut std::io::stdout());
        }

        if let Some(alerts) = &self.alerts {
            if alerts.check(&prediction) == AlertOutcome::Failed {
                warn!(cycle, "alert not delivered; will retry next cycle");
            }
            for (kind, outcome) in alerts.check_critical(&features) {
                if outcome == AlertOutcome::Failed {
                    warn!(cycle, kind, "critical notice not delivered");
                }
            }
        }

        if self.force_optimize || self.config.optimizer.auto_enabled {
            let result = self.optimizer.optimize_snapshot(&features);
            self.store.record_optimization(&result)?;
        }

        self.train_refiner_if_due(cycle);
        self.prune_if_due(cycle);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::var("AUTOSENSE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.json"));
    let config = AgentConfig::load(&config_path);

    StructuredLogger::init(config.log.json, &config.log.level);

    info!(data_dir = ?config.data_dir, "AutoSense agent starting");

    std::fs::create_dir_all(&config.data_dir)?;
    let store = SecureStore::open(&config.data_dir.join("store.db"), &store_secret())?;

    let collector = Arc::new(HostCollector::new(config.collectors.clone()));
    let engine = RiskEngine::new(config.engine.clone(), config.risk.clone());
    let refiner = SequenceRefiner::load(config.refiner.clone(), &config.refiner_model_path());
    let window = FeatureWindow::new(refiner.sequence_len());
    for record in store.recent_history(refiner.sequence_len())? {
        window.push(&record.features);
    }
    let optimizer = AutoOptimizer::new(
        config.optimizer.clone(),
        Arc::new(HostActions::new(collector.clone())),
    );
    let alerts = if config.alert.enabled {
        match AlertChannel::from_config(&config.alert) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "alert channel disabled");
                None
            }
        }
    } else {
        None
    };

    let interval_secs = config.collectors.sample_interval_secs;
    let runtime = Runtime {
        config,
        collector,
        engine,
        refiner,
        window,
        optimizer,
        alerts,
        store,
        force_optimize: std::env::args().any(|a| a == "--optimize"),
    };

    if interval_secs > 0 {
        info!(interval_secs, "daemon mode (Ctrl+C to stop)");
        static STOP: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);
        let _ = ctrlc::set_handler(|| {
            STOP.store(true, std::sync::atomic::Ordering::Relaxed);
        });
        let mut cycle: u64 = 0;
        while !STOP.load(std::sync::atomic::Ordering::Relaxed) {
            cycle += 1;
            if let Err(e) = runtime.run_one_cycle(cycle) {
                warn!(cycle, error = %e, "cycle failed");
            }
            for _ in 0..interval_secs {
                if STOP.load(std::sync::atomic::Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(Duration::from_secs(1));
            }
        }
        info!("AutoSense agent stopping");
    } else {
        runtime.run_one_cycle(1)?;
        info!("AutoSense agent cycle complete");
    }

    Ok(())
}
