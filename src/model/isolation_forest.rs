//! Isolation forest over standardized feature rows.
//!
//! Each tree recursively splits a random sub-sample on a random feature at a
//! uniform random threshold. Outliers isolate in few splits, so a short
//! average path means "anomalous". Scores follow the usual convention:
//! `decision_function` is shifted by the contamination quantile of the
//! training scores, so roughly `contamination` of the training rows score
//! below zero and more negative means more anomalous.

use crate::config::EngineConfig;
use crate::error::{AgentError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForestParams {
    pub trees: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            trees: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

impl From<&EngineConfig> for IsolationForestParams {
    fn from(c: &EngineConfig) -> Self {
        Self {
            trees: c.trees.max(1),
            max_samples: c.max_samples.max(2),
            contamination: c.contamination.clamp(0.0, 0.5),
            seed: c.seed,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(x: &ArrayView2<f64>, rows: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = IsolationTree { nodes: Vec::new() };
        tree.grow(x, rows, 0, max_depth, rng);
        tree
    }

    /// Appends the subtree for `rows` and returns its root index.
    fn grow(
        &mut self,
        x: &ArrayView2<f64>,
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        if depth >= max_depth || rows.len() <= 1 {
            self.nodes.push(Node::Leaf { size: rows.len() });
            return id;
        }

        // Only features that still vary inside this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..x.ncols())
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = x[[r, f]];
                    (lo.min(v), hi.max(v))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            self.nodes.push(Node::Leaf { size: rows.len() });
            return id;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| x[[r, feature]] <= threshold);

        // placeholder, patched once both children exist
        self.nodes.push(Node::Leaf { size: 0 });
        let left = self.grow(x, left_rows, depth + 1, max_depth, rng);
        let right = self.grow(x, right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: &ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        let mut depth = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1;
                }
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    n_features: usize,
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    pub fn fit(x: &Array2<f64>, params: &IsolationForestParams) -> Result<Self> {
        let n = x.nrows();
        if n == 0 {
            return Err(AgentError::InsufficientHistory { got: 0, need: 1 });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(AgentError::NonFinite("training matrix".into()));
        }
        let view = x.view();
        let sample_size = params.max_samples.clamp(1, n);
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.trees.max(1))
            .map(|_| {
                let rows = index::sample(&mut rng, n, sample_size).into_vec();
                IsolationTree::build(&view, rows, max_depth, &mut rng)
            })
            .collect();

        let mut forest = IsolationForest {
            trees,
            n_features: x.ncols(),
            sample_size,
            offset: 0.0,
        };
        let mut train_scores: Vec<f64> = x
            .rows()
            .into_iter()
            .map(|r| forest.raw_score(&r))
            .collect();
        forest.offset = percentile(&mut train_scores, params.contamination * 100.0);
        Ok(forest)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Opposite of the anomaly score: in [-1, 0), lower is more anomalous.
    fn raw_score(&self, row: &ArrayView1<f64>) -> f64 {
        let mean_depth = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>()
            / self.trees.len() as f64;
        let norm = average_path_length(self.sample_size).max(f64::EPSILON);
        -(2f64.powf(-mean_depth / norm))
    }

    pub fn score_samples(&self, row: ArrayView1<f64>) -> Result<f64> {
        if row.len() != self.n_features {
            return Err(AgentError::DimensionMismatch {
                expected: self.n_features,
                got: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(AgentError::NonFinite("scoring row".into()));
        }
        Ok(self.raw_score(&row))
    }

    /// Raw anomaly score; negative values are outliers relative to the
    /// contamination quantile of the training data.
    pub fn decision_function(&self, row: ArrayView1<f64>) -> Result<f64> {
        Ok(self.score_samples(row)? - self.offset)
    }
}

/// Linear-interpolated percentile (`q` in 0..=100). Sorts `values` in place.
fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    values[lo] + (values[hi] - values[lo]) * frac
}
