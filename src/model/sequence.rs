//! Trend refiner: a small recurrent network over recent (cpu, memory, disk)
//! steps predicting the next risk score.
//!
//! The refiner is a capability, not a dependency of scoring. Until it has been
//! trained (or loaded from disk) `is_available` is false and `predict_next`
//! returns `None`.

use crate::config::RefinerConfig;
use crate::error::{AgentError, Result};
use crate::features::{FeatureVector, HistoryRecord, Normalizer, TREND_KEYS};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

const GRAD_CLIP_NORM: f64 = 1.0;

/// Elman RNN: h_t = tanh(Wx x_t + Wh h_{t-1} + b), y = wo . h_T + bo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RnnWeights {
    wx: Array2<f64>,
    wh: Array2<f64>,
    b: Array1<f64>,
    wo: Array1<f64>,
    bo: f64,
}

impl RnnWeights {
    fn zeros(hidden: usize, inputs: usize) -> Self {
        Self {
            wx: Array2::zeros((hidden, inputs)),
            wh: Array2::zeros((hidden, hidden)),
            b: Array1::zeros(hidden),
            wo: Array1::zeros(hidden),
            bo: 0.0,
        }
    }

    fn init(hidden: usize, inputs: usize, rng: &mut StdRng) -> Self {
        let k = 1.0 / (hidden as f64).sqrt();
        let mut w = Self::zeros(hidden, inputs);
        w.wx.mapv_inplace(|_| rng.gen_range(-k..k));
        w.wh.mapv_inplace(|_| rng.gen_range(-k..k));
        w.wo.mapv_inplace(|_| rng.gen_range(-k..k));
        w
    }

    fn forward(&self, steps: ArrayView2<f64>) -> (Vec<Array1<f64>>, f64) {
        let mut hs: Vec<Array1<f64>> = Vec::with_capacity(steps.nrows() + 1);
        hs.push(Array1::zeros(self.b.len()));
        for x in steps.rows() {
            let z = self.wx.dot(&x) + self.wh.dot(&hs[hs.len() - 1]) + &self.b;
            hs.push(z.mapv(f64::tanh));
        }
        let y = self.wo.dot(&hs[hs.len() - 1]) + self.bo;
        (hs, y)
    }

    /// Back-propagate squared error through time into `grad`; returns the loss.
    fn accumulate(&self, steps: ArrayView2<f64>, target: f64, grad: &mut RnnWeights) -> f64 {
        let (hs, y) = self.forward(steps);
        let err = y - target;
        let dy = 2.0 * err;
        let last = steps.nrows();

        grad.wo.scaled_add(dy, &hs[last]);
        grad.bo += dy;
        let mut dh = &self.wo * dy;
        for t in (0..last).rev() {
            let dz = &dh * &hs[t + 1].mapv(|h| 1.0 - h * h);
            let dz_col = dz.view().insert_axis(Axis(1));
            grad.wx += &dz_col.dot(&steps.row(t).insert_axis(Axis(0)));
            grad.wh += &dz_col.dot(&hs[t].view().insert_axis(Axis(0)));
            grad.b += &dz;
            dh = self.wh.t().dot(&dz);
        }
        err * err
    }

    fn norm(&self) -> f64 {
        (self.wx.iter().chain(self.wh.iter()).chain(self.b.iter()).chain(self.wo.iter())
            .map(|v| v * v)
            .sum::<f64>()
            + self.bo * self.bo)
            .sqrt()
    }

    fn apply(&mut self, grad: &RnnWeights, step: f64) {
        self.wx.scaled_add(-step, &grad.wx);
        self.wh.scaled_add(-step, &grad.wh);
        self.b.scaled_add(-step, &grad.b);
        self.wo.scaled_add(-step, &grad.wo);
        self.bo -= step * grad.bo;
    }
}

/// A trained refiner and the scaling it was trained under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedRefiner {
    sequence_len: usize,
    normalizer: Normalizer,
    weights: RnnWeights,
    pub trained_at: DateTime<Utc>,
    pub samples: usize,
    pub final_loss: f64,
}

impl TrainedRefiner {
    fn predict(&self, recent: &[FeatureVector]) -> Result<f64> {
        if recent.len() < self.sequence_len {
            return Err(AgentError::InsufficientHistory {
                got: recent.len(),
                need: self.sequence_len,
            });
        }
        let tail = &recent[recent.len() - self.sequence_len..];
        let mut steps = Array2::zeros((self.sequence_len, TREND_KEYS.len()));
        for (i, fv) in tail.iter().enumerate() {
            let z = self.normalizer.transform(&fv.trend_step())?;
            steps.row_mut(i).assign(&z);
        }
        let (_, y) = self.weights.forward(steps.view());
        Ok(y.clamp(0.0, 1.0))
    }
}

/// On-disk envelope: the model JSON plus its SHA-256.
#[derive(Serialize, Deserialize)]
struct PersistedRefiner {
    sha256: String,
    model: String,
}

fn digest_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub struct SequenceRefiner {
    config: RefinerConfig,
    model: RwLock<Option<Arc<TrainedRefiner>>>,
}

impl SequenceRefiner {
    pub fn new(config: RefinerConfig) -> Self {
        Self {
            config,
            model: RwLock::new(None),
        }
    }

    /// Load a persisted model. A missing file is simply "untrained"; an
    /// unreadable or tampered one is logged and also treated as untrained.
    pub fn load(config: RefinerConfig, path: &Path) -> Self {
        let refiner = Self::new(config);
        if !path.exists() {
            return refiner;
        }
        match Self::read_model(path) {
            Ok(model) => {
                info!(path = %path.display(), samples = model.samples, "sequence refiner loaded");
                refiner.install(model);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "sequence refiner not loaded"),
        }
        refiner
    }

    fn read_model(path: &Path) -> Result<TrainedRefiner> {
        let data = std::fs::read_to_string(path)?;
        let envelope: PersistedRefiner = serde_json::from_str(&data)?;
        if digest_hex(envelope.model.as_bytes()) != envelope.sha256 {
            return Err(AgentError::ChecksumMismatch(path.display().to_string()));
        }
        Ok(serde_json::from_str(&envelope.model)?)
    }

    /// Persist the current model. Writes a sibling temp file, then renames.
    pub fn save(&self, path: &Path) -> Result<bool> {
        let Some(model) = self.current() else {
            return Ok(false);
        };
        let json = serde_json::to_string(model.as_ref())?;
        let envelope = PersistedRefiner {
            sha256: digest_hex(json.as_bytes()),
            model: json,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&envelope)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(true)
    }

    fn current(&self) -> Option<Arc<TrainedRefiner>> {
        match self.model.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn install(&self, model: TrainedRefiner) {
        let model = Some(Arc::new(model));
        match self.model.write() {
            Ok(mut g) => *g = model,
            Err(poisoned) => *poisoned.into_inner() = model,
        }
    }

    pub fn is_available(&self) -> bool {
        self.current().is_some()
    }

    pub fn sequence_len(&self) -> usize {
        self.config.sequence_len.max(1)
    }

    pub fn trained(&self) -> Option<Arc<TrainedRefiner>> {
        self.current()
    }

    /// Train on time-ordered history. Records without a risk label are
    /// ignored. Returns `Ok(false)` when there are too few labeled samples;
    /// the previous model, if any, stays in place.
    pub fn train(&self, history: &[HistoryRecord]) -> Result<bool> {
        let labeled: Vec<(&FeatureVector, f64)> = history
            .iter()
            .filter(|r| !r.features.is_empty())
            .filter_map(|r| r.risk_score.map(|s| (&r.features, s)))
            .collect();
        let seq = self.sequence_len();
        let need = self.config.min_samples.max(seq + 1);
        if labeled.len() < need {
            return Ok(false);
        }

        let rows = Array2::from_shape_fn((labeled.len(), TREND_KEYS.len()), |(i, j)| {
            labeled[i].0.trend_step()[j]
        });
        let normalizer = Normalizer::fit(&rows, seq + 1)?;
        let scaled = normalizer.transform_matrix(&rows)?;
        let targets: Vec<f64> = labeled.iter().map(|(_, s)| s.clamp(0.0, 1.0)).collect();

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let hidden = self.config.hidden.max(1);
        let mut weights = RnnWeights::init(hidden, TREND_KEYS.len(), &mut rng);
        let mut order: Vec<usize> = (seq..labeled.len()).collect();
        let batch = self.config.batch_size.max(1);
        let mut epoch_loss = f64::NAN;

        for _ in 0..self.config.epochs.max(1) {
            order.shuffle(&mut rng);
            let mut total = 0.0;
            for chunk in order.chunks(batch) {
                let mut grad = RnnWeights::zeros(hidden, TREND_KEYS.len());
                for &end in chunk {
                    let window = scaled.slice(ndarray::s![end - seq..end, ..]);
                    total += weights.accumulate(window, targets[end], &mut grad);
                }
                let norm = grad.norm() / chunk.len() as f64;
                let clip = if norm > GRAD_CLIP_NORM { GRAD_CLIP_NORM / norm } else { 1.0 };
                weights.apply(&grad, self.config.learning_rate * clip / chunk.len() as f64);
            }
            epoch_loss = total / order.len() as f64;
        }

        if !epoch_loss.is_finite() {
            return Err(AgentError::NonFinite("refiner training loss".into()));
        }
        info!(samples = labeled.len(), loss = epoch_loss, "sequence refiner trained");
        self.install(TrainedRefiner {
            sequence_len: seq,
            normalizer,
            weights,
            trained_at: Utc::now(),
            samples: labeled.len(),
            final_loss: epoch_loss,
        });
        Ok(true)
    }

    /// Next-step risk estimate from the most recent snapshots (oldest first).
    /// `None` when untrained or the window is too short.
    pub fn predict_next(&self, recent: &[FeatureVector]) -> Option<f64> {
        let model = self.current()?;
        model.predict(recent).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::keys;

    fn labeled(n: usize) -> Vec<HistoryRecord> {
        (0..n)
            .map(|i| {
                let cpu = 20.0 + (i % 20) as f64 * 3.0;
                let fv = FeatureVector::empty()
                    .with(keys::CPU_PERCENT, cpu)
                    .with(keys::MEMORY_PERCENT, 40.0 + (i % 7) as f64)
                    .with(keys::DISK_PERCENT, 55.0);
                HistoryRecord::new(fv, Some(cpu / 100.0))
            })
            .collect()
    }

    #[test]
    fn too_few_samples_leaves_it_unavailable() {
        let r = SequenceRefiner::new(RefinerConfig::default());
        assert!(!r.train(&labeled(49)).unwrap());
        assert!(!r.is_available());
        assert_eq!(r.predict_next(&[]), None);
    }

    #[test]
    fn unlabeled_records_do_not_count() {
        let r = SequenceRefiner::new(RefinerConfig::default());
        let mut h = labeled(60);
        for rec in h.iter_mut().skip(20) {
            rec.risk_score = None;
        }
        assert!(!r.train(&h).unwrap());
    }

    #[test]
    fn trains_and_predicts_bounded() {
        let r = SequenceRefiner::new(RefinerConfig::default());
        let h = labeled(80);
        assert!(r.train(&h).unwrap());
        assert!(r.is_available());
        let recent: Vec<FeatureVector> = h.iter().rev().take(10).rev().map(|r| r.features.clone()).collect();
        let y = r.predict_next(&recent).unwrap();
        assert!((0.0..=1.0).contains(&y));
        // a window shorter than the sequence length gives no estimate
        assert_eq!(r.predict_next(&recent[..5]), None);
    }

    #[test]
    fn training_is_deterministic() {
        let h = labeled(70);
        let a = SequenceRefiner::new(RefinerConfig::default());
        let b = SequenceRefiner::new(RefinerConfig::default());
        a.train(&h).unwrap();
        b.train(&h).unwrap();
        let wa = &a.trained().unwrap().weights;
        let wb = &b.trained().unwrap().weights;
        assert_eq!(wa, wb);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refiner.json");
        let r = SequenceRefiner::new(RefinerConfig::default());
        assert!(!r.save(&path).unwrap());
        r.train(&labeled(60)).unwrap();
        assert!(r.save(&path).unwrap());

        let loaded = SequenceRefiner::load(RefinerConfig::default(), &path);
        assert!(loaded.is_available());
        let recent: Vec<FeatureVector> = labeled(10).into_iter().map(|r| r.features).collect();
        assert_eq!(r.predict_next(&recent), loaded.predict_next(&recent));
    }

    #[test]
    fn tampered_model_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refiner.json");
        let r = SequenceRefiner::new(RefinerConfig::default());
        r.train(&labeled(60)).unwrap();
        r.save(&path).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        envelope["sha256"] = serde_json::Value::String("0".repeat(64));
        std::fs::write(&path, envelope.to_string()).unwrap();

        assert!(!SequenceRefiner::load(RefinerConfig::default(), &path).is_available());
        assert!(!SequenceRefiner::load(RefinerConfig::default(), &dir.path().join("missing.json")).is_available());
    }
}
