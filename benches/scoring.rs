//! Scoring benchmark: forest fit and per-snapshot risk scoring.

use autosense_agent::config::{EngineConfig, RiskConfig};
use autosense_agent::features::{keys, FeatureVector};
use autosense_agent::risk::RiskEngine;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn history(n: usize) -> Vec<FeatureVector> {
    (0..n)
        .map(|i| {
            FeatureVector::empty()
                .with(keys::CPU_PERCENT, 20.0 + (i % 17) as f64)
                .with(keys::MEMORY_PERCENT, 45.0 + (i % 11) as f64)
                .with(keys::DISK_PERCENT, 60.0)
                .with(keys::PROCESS_COUNT, 140.0 + (i % 9) as f64)
                .with(keys::HIGH_CPU_PROCESSES, (i % 3) as f64)
                .with(keys::HIGH_MEMORY_PROCESSES, 1.0)
        })
        .collect()
}

fn bench_fit(c: &mut Criterion) {
    let engine = RiskEngine::new(EngineConfig::default(), RiskConfig::default());
    let mut g = c.benchmark_group("fit_by_history");
    for n in [50, 256, 1000] {
        let h = history(n);
        g.bench_function(format!("samples_{}", n).as_str(), |b| {
            b.iter(|| black_box(engine.fit_history(black_box(&h))).unwrap())
        });
    }
    g.finish();
}

fn bench_score(c: &mut Criterion) {
    let engine = RiskEngine::new(EngineConfig::default(), RiskConfig::default());
    let query = history(7).pop().unwrap_or_default();

    c.bench_function("score_heuristic", |b| b.iter(|| engine.score(black_box(&query))));

    engine.fit_history(&history(256)).unwrap();
    c.bench_function("score_fitted", |b| b.iter(|| engine.score(black_box(&query))));
    c.bench_function("predict_fitted", |b| {
        b.iter(|| black_box(engine.predict(query.clone())))
    });
}

criterion_group!(benches, bench_fit, bench_score);
criterion_main!(benches);
