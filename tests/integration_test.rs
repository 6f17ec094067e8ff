//! Integration tests: config defaults, engine fit/score lifecycle, prediction
//! records, store round-trips and refiner training from stored history.

use autosense_agent::{
    collectors::{FeatureSource, HostCollector},
    config::{AgentConfig, CollectorsConfig, EngineConfig, RefinerConfig, RiskConfig, StorageConfig},
    features::{keys, FeatureVector},
    model::SequenceRefiner,
    optimizer::{ActionReport, MemoryReclaim, OptimizationKind, OptimizationResult},
    risk::{explain, RiskEngine, RiskLevel},
    storage::{HistorySource, PredictionSink, SecureStore},
};
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::path::Path;

fn engine() -> RiskEngine {
    RiskEngine::new(EngineConfig::default(), RiskConfig::default())
}

fn snapshot(cpu: f64, memory: f64, disk: f64, processes: f64, high_cpu: f64) -> FeatureVector {
    FeatureVector::empty()
        .with(keys::CPU_PERCENT, cpu)
        .with(keys::MEMORY_PERCENT, memory)
        .with(keys::DISK_PERCENT, disk)
        .with(keys::PROCESS_COUNT, processes)
        .with(keys::HIGH_CPU_PROCESSES, high_cpu)
        .with(keys::HIGH_MEMORY_PROCESSES, 1.0)
}

/// Deterministic "normal" history around 30% CPU / 50% memory.
fn normal_history(n: usize) -> Vec<FeatureVector> {
    (0..n)
        .map(|i| {
            let wobble = ((i * 37) % 11) as f64;
            snapshot(
                25.0 + wobble,
                48.0 + wobble / 2.0,
                60.0 + (i % 3) as f64,
                140.0 + (i % 9) as f64,
                (i % 3) as f64,
            )
        })
        .collect()
}

#[test]
fn config_load_default() {
    let c = AgentConfig::load(Path::new("nonexistent.json"));
    assert_eq!(c.engine.min_fit_samples, 5);
    assert_eq!(c.engine.contamination, 0.1);
    assert_eq!(c.engine.seed, 42);
    assert_eq!(c.refiner.sequence_len, 10);
    assert!(!c.alert.enabled);
    assert!(!c.optimizer.auto_enabled);
    assert_eq!(c.storage.prune_every_cycles, 60);
}

#[test]
fn config_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"optimizer": {"auto_enabled": true}, "log": {"json": false}}"#).unwrap();
    let c = AgentConfig::load(&path);
    assert!(c.optimizer.auto_enabled);
    assert_eq!(c.optimizer.memory_percent, 70.0);
    assert!(!c.log.json);
    assert_eq!(c.log.level, "info");
    assert_eq!(c.refiner_model_path(), c.data_dir.join("refiner.json"));
}

#[test]
fn unfitted_engine_uses_heuristic() {
    let e = engine();
    assert!(!e.is_fitted());
    let fv = FeatureVector::empty()
        .with(keys::CPU_PERCENT, 100.0)
        .with(keys::MEMORY_PERCENT, 100.0);
    assert_eq!(e.score(&fv), (1.0, RiskLevel::High));

    let p = e.predict(snapshot(20.0, 30.0, 40.0, 50.0, 0.0));
    assert_eq!(p.risk_score, 0.25);
    assert_eq!(p.risk_level, RiskLevel::Low);
    assert!(!p.is_ai_fitted);
}

#[test]
fn risk_levels_follow_thresholds() {
    let config = RiskConfig::default();
    assert_eq!(RiskLevel::from_score(0.299, &config), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(0.3, &config), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(0.599, &config), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(0.6, &config), RiskLevel::High);
}

#[test]
fn fit_needs_five_samples() {
    let e = engine();
    let history = normal_history(5);
    assert!(!e.ensure_fitted(&history[..4]));
    assert!(!e.is_fitted());
    assert!(e.ensure_fitted(&history));
    assert!(e.is_fitted());
    assert!(e.predict(snapshot(30.0, 50.0, 60.0, 140.0, 1.0)).is_ai_fitted);
}

#[test]
fn fitted_scores_stay_bounded() {
    let e = engine();
    assert!(e.ensure_fitted(&normal_history(50)));
    for cpu in [0.0, 30.0, 100.0] {
        for memory in [0.0, 50.0, 100.0] {
            for processes in [0.0, 140.0, 5000.0] {
                let (score, level) = e.score(&snapshot(cpu, memory, 100.0, processes, 40.0));
                assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
                assert_ne!(level, RiskLevel::Unknown);
            }
        }
    }
}

#[test]
fn fitted_model_ranks_outliers_higher() {
    let e = engine();
    assert!(e.ensure_fitted(&normal_history(50)));
    let (normal, _) = e.score(&snapshot(30.0, 50.0, 61.0, 144.0, 1.0));
    let (outlier, _) = e.score(&snapshot(99.0, 97.0, 99.0, 900.0, 30.0));
    assert!(outlier > normal, "outlier {} normal {}", outlier, normal);
}

#[test]
fn refit_is_deterministic() {
    let history = normal_history(50);
    let query = snapshot(55.0, 70.0, 62.0, 150.0, 2.0);

    let a = engine();
    assert!(a.ensure_fitted(&history));
    let first = a.raw_anomaly_score(&query).unwrap();
    assert!(a.ensure_fitted(&history));
    assert_eq!(a.raw_anomaly_score(&query).unwrap(), first);

    let b = engine();
    assert!(b.ensure_fitted(&history));
    assert_eq!(b.score(&query), a.score(&query));
}

#[test]
fn empty_snapshot_is_unknown() {
    let e = engine();
    let p = e.predict(FeatureVector::empty());
    assert_eq!(p.risk_score, 0.5);
    assert_eq!(p.risk_level, RiskLevel::Unknown);
    assert!(p.recommendations.is_empty());
    assert_eq!(p.explanation, "Unable to collect system metrics");

    assert!(e.ensure_fitted(&normal_history(10)));
    let p = e.predict_degradation_risk(&FeatureVector::empty());
    assert_eq!(p.risk_level, RiskLevel::Unknown);
    assert!(p.is_ai_fitted);
}

#[test]
fn cpu_bound_snapshot_explains_cpu_only() {
    let e = engine();
    let fv = FeatureVector::empty()
        .with(keys::CPU_PERCENT, 85.0)
        .with(keys::MEMORY_PERCENT, 40.0)
        .with(keys::DISK_PERCENT, 10.0)
        .with(keys::PROCESS_COUNT, 20.0)
        .with(keys::HIGH_CPU_PROCESSES, 0.0);
    let p = e.predict(fv);
    assert_eq!(p.risk_score, 0.625);
    assert_eq!(p.risk_level, RiskLevel::High);
    assert!(p.explanation.contains("critically high"));
    assert!(!p.explanation.contains("Memory"));
    assert!(!p.recommendations.is_empty());
    assert!(p.recommendations.iter().any(|r| r.contains("CPU")));
    assert!(!p.recommendations.iter().any(|r| r == explain::DEEP_SCAN_ADVICE));
}

#[test]
fn prediction_serializes_with_lowercase_level() {
    let p = engine().predict(snapshot(10.0, 10.0, 10.0, 10.0, 0.0));
    let json = serde_json::to_value(&p).unwrap();
    assert_eq!(json["risk_level"], "low");
    assert_eq!(json["features"]["cpu_percent"], 10.0);
    assert!(json.get("trend_score").is_none());

    let with_trend = p.with_trend(Some(0.12345));
    assert_eq!(with_trend.trend_score, Some(0.123));
}

#[test]
fn host_collector_reports_sane_ranges() {
    let config = CollectorsConfig {
        cpu_window_ms: 200,
        ..CollectorsConfig::default()
    };
    let collector = HostCollector::new(config);
    let fv = collector.collect();
    if fv.is_empty() {
        return;
    }
    for key in [keys::CPU_PERCENT, keys::MEMORY_PERCENT, keys::DISK_PERCENT] {
        let v = fv.get(key);
        assert!((0.0..=100.0).contains(&v), "{} = {}", key, v);
    }
    assert!(fv.get(keys::PROCESS_COUNT) >= 1.0);
    assert!(fv.get(keys::HIGH_CPU_PROCESSES) <= fv.get(keys::PROCESS_COUNT));
    assert!(fv.try_get(keys::CPU_LOAD_AVG).is_some());
}

#[test]
fn storage_history_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = SecureStore::open(&dir.path().join("store.db"), b"test-secret").unwrap();
    let start = Utc::now() - Duration::minutes(10);

    for (i, fv) in normal_history(6).into_iter().enumerate() {
        let label = (i % 2 == 0).then_some(0.2);
        let written = store
            .record_metrics(&fv, label, start + Duration::seconds(i as i64))
            .unwrap();
        assert!(written);
    }
    assert!(!store.record_metrics(&FeatureVector::empty(), None, Utc::now()).unwrap());

    let history = store.recent_history(4).unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|w| w[0].ts <= w[1].ts));
    assert_eq!(history[3].features, normal_history(6)[5]);

    let labeled = store.labeled_history(10).unwrap();
    assert_eq!(labeled.len(), 3);
    assert!(labeled.iter().all(|r| r.risk_score == Some(0.2)));

    let e = engine();
    assert!(e.ensure_fitted_from_records(&store.recent_history(50).unwrap()));
}

#[test]
fn storage_prediction_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = SecureStore::open(&dir.path().join("store.db"), b"test-secret").unwrap();
    let p = engine().predict(snapshot(90.0, 90.0, 95.0, 220.0, 7.0));
    store.record_prediction(&p).unwrap();

    let back = store.get_prediction(&p.id).unwrap().unwrap();
    assert_eq!(back, p);
    assert!(store.get_prediction("missing").unwrap().is_none());

    // a different secret cannot read the payload
    drop(store);
    let other = SecureStore::open(&dir.path().join("store.db"), b"other-secret").unwrap();
    assert!(other.get_prediction(&p.id).is_err());
}

#[test]
fn storage_optimizations_and_prune() {
    let dir = tempfile::tempdir().unwrap();
    let store = SecureStore::open(&dir.path().join("store.db"), b"test-secret").unwrap();
    let mut results = BTreeMap::new();
    results.insert(
        OptimizationKind::RamBoost,
        ActionReport::RamBoost(MemoryReclaim {
            memory_before: 82.0,
            memory_after: 80.5,
            freed_percent: 1.5,
        }),
    );
    results.insert(
        OptimizationKind::DiskCleanup,
        ActionReport::Failed {
            error: "scan failed".into(),
        },
    );
    let result = OptimizationResult {
        success: true,
        optimizations_performed: vec!["RAM Boost".into(), "Disk Cleanup".into()],
        results,
        timestamp: Utc::now() - Duration::hours(2),
        error: None,
    };
    assert_eq!(store.record_optimization(&result).unwrap(), 2);

    let recent = store.recent_optimizations(10).unwrap();
    assert_eq!(recent.len(), 2);
    let ram = recent.iter().find(|r| r.kind == OptimizationKind::RamBoost).unwrap();
    assert_eq!((ram.before_value, ram.after_value), (82.0, 80.5));
    assert!(ram.success);
    let disk = recent.iter().find(|r| r.kind == OptimizationKind::DiskCleanup).unwrap();
    assert!(!disk.success);

    store
        .record_metrics(&snapshot(1.0, 1.0, 1.0, 1.0, 0.0), None, Utc::now())
        .unwrap();
    let removed = store.prune_before(Utc::now() - Duration::hours(1)).unwrap();
    assert_eq!(removed, 2);
    assert!(store.recent_optimizations(10).unwrap().is_empty());
    assert_eq!(store.recent_history(10).unwrap().len(), 1);
}

#[test]
fn refiner_trains_from_stored_labels() {
    let dir = tempfile::tempdir().unwrap();
    let store = SecureStore::open(&dir.path().join("store.db"), b"test-secret").unwrap();
    let e = engine();
    let start = Utc::now() - Duration::hours(1);
    for (i, fv) in normal_history(60).into_iter().enumerate() {
        let p = e.predict(fv.clone());
        store
            .record_metrics(&fv, Some(p.risk_score), start + Duration::seconds(i as i64))
            .unwrap();
    }

    let refiner = SequenceRefiner::new(RefinerConfig::default());
    let labeled = store.labeled_history(500).unwrap();
    assert!(!refiner.train(&labeled[..40]).unwrap());
    assert!(refiner.train(&labeled).unwrap());

    let recent: Vec<FeatureVector> = labeled.iter().rev().take(10).rev().map(|r| r.features.clone()).collect();
    let trend = refiner.predict_next(&recent).unwrap();
    assert!((0.0..=1.0).contains(&trend));
}

#[test]
fn retention_cutoff_follows_config() {
    let now = Utc::now();
    let storage = AgentConfig::default().storage;
    assert_eq!(storage.retention_days, 30);
    assert_eq!(storage.retention_cutoff(now), Some(now - Duration::days(30)));

    let off = StorageConfig {
        retention_days: 0,
        ..StorageConfig::default()
    };
    assert_eq!(off.retention_cutoff(now), None);

    let forever = StorageConfig {
        retention_days: u32::MAX,
        ..StorageConfig::default()
    };
    assert_eq!(forever.retention_cutoff(now), None);
}

#[test]
fn storage_drops_non_finite_readings() {
    let dir = tempfile::tempdir().unwrap();
    let store = SecureStore::open(&dir.path().join("store.db"), b"test-secret").unwrap();
    let start = Utc::now() - Duration::minutes(10);
    for (i, fv) in normal_history(6).into_iter().enumerate() {
        let fv = if i == 2 { fv.with(keys::CPU_LOAD_AVG, f64::NAN) } else { fv };
        assert!(store
            .record_metrics(&fv, Some(0.3), start + Duration::seconds(i as i64))
            .unwrap());
    }
    let only_nan = FeatureVector::empty().with(keys::CPU_PERCENT, f64::INFINITY);
    assert!(!store.record_metrics(&only_nan, None, Utc::now()).unwrap());

    let history = store.recent_history(50).unwrap();
    assert_eq!(history.len(), 6);
    assert!(history[2].features.try_get(keys::CPU_LOAD_AVG).is_none());
    assert_eq!(history[2].features.get(keys::CPU_PERCENT), normal_history(6)[2].get(keys::CPU_PERCENT));
    assert!(engine().ensure_fitted_from_records(&history));
}

#[test]
fn storage_skips_undecodable_history_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let store = SecureStore::open(&path, b"test-secret").unwrap();
    let start = Utc::now() - Duration::minutes(10);
    for (i, fv) in normal_history(5).into_iter().enumerate() {
        store
            .record_metrics(&fv, Some(0.2), start + Duration::seconds(i as i64))
            .unwrap();
    }

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute(
        "INSERT INTO metrics (ts, cpu_percent, memory_percent, disk_percent, process_count,
            high_cpu_processes, high_memory_processes, features, risk_score)
         VALUES (?1, 0, 0, 0, 0, 0, 0, '{\"cpu_load_avg\":null}', 0.2)",
        rusqlite::params![Utc::now().timestamp_millis()],
    )
    .unwrap();
    drop(raw);

    assert_eq!(store.recent_history(50).unwrap().len(), 5);
    assert_eq!(store.labeled_history(50).unwrap().len(), 5);
}

#[test]
fn concurrent_scoring_never_sees_partial_fit() {
    let a = normal_history(50);
    let b: Vec<FeatureVector> = normal_history(50)
        .into_iter()
        .map(|fv| {
            let cpu = fv.get(keys::CPU_PERCENT);
            fv.with(keys::CPU_PERCENT, cpu + 40.0)
        })
        .collect();
    let query = snapshot(55.0, 70.0, 62.0, 150.0, 2.0);

    let e = engine();
    e.fit_history(&b).unwrap();
    let score_b = e.raw_anomaly_score(&query).unwrap();
    e.fit_history(&a).unwrap();
    let score_a = e.raw_anomaly_score(&query).unwrap();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..200 {
                    let r = e.raw_anomaly_score(&query).unwrap();
                    assert!(r == score_a || r == score_b, "unexpected score {}", r);
                }
            });
        }
        for i in 0..10 {
            let history = if i % 2 == 0 { &b } else { &a };
            e.fit_history(history).unwrap();
        }
    });
    assert_eq!(e.fitted_samples(), Some(50));
}
