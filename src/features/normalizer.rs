//! Per-column standardization: (x - mean) / scale.

use crate::error::{AgentError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Fitted centering/scaling statistics. Built whole by [`Normalizer::fit`];
/// refitting produces a new value rather than updating this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Normalizer {
    /// Fit on `rows` (one sample per row). Fails without producing any state
    /// when fewer than `min_samples` rows are given or a value is non-finite.
    pub fn fit(rows: &Array2<f64>, min_samples: usize) -> Result<Self> {
        let n = rows.nrows();
        if n < min_samples.max(1) {
            return Err(AgentError::InsufficientHistory {
                got: n,
                need: min_samples.max(1),
            });
        }
        if let Some((_, col)) = rows
            .indexed_iter()
            .find(|(_, v)| !v.is_finite())
            .map(|((r, c), _)| (r, c))
        {
            return Err(AgentError::NonFinite(format!("column {}", col)));
        }
        let mean = rows
            .mean_axis(Axis(0))
            .ok_or(AgentError::InsufficientHistory { got: 0, need: 1 })?;
        // Population variance; constant columns keep unit scale.
        let scale = rows
            .var_axis(Axis(0), 0.0)
            .mapv(|v| if v > f64::EPSILON { v.sqrt() } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn scale(&self) -> ArrayView1<'_, f64> {
        self.scale.view()
    }

    pub fn transform(&self, row: &[f64]) -> Result<Array1<f64>> {
        if row.len() != self.dim() {
            return Err(AgentError::DimensionMismatch {
                expected: self.dim(),
                got: row.len(),
            });
        }
        if let Some(i) = row.iter().position(|v| !v.is_finite()) {
            return Err(AgentError::NonFinite(format!("column {}", i)));
        }
        let x = ArrayView1::from(row);
        Ok((&x - &self.mean) / &self.scale)
    }

    pub fn transform_matrix(&self, rows: &Array2<f64>) -> Result<Array2<f64>> {
        if rows.ncols() != self.dim() {
            return Err(AgentError::DimensionMismatch {
                expected: self.dim(),
                got: rows.ncols(),
            });
        }
        Ok((rows - &self.mean) / &self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rejects_short_history() {
        let rows = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]];
        let err = Normalizer::fit(&rows, 5).unwrap_err();
        assert!(matches!(
            err,
            AgentError::InsufficientHistory { got: 4, need: 5 }
        ));
    }

    #[test]
    fn standardizes_columns() {
        let rows = array![[1.0, 10.0], [2.0, 10.0], [3.0, 10.0], [4.0, 10.0], [5.0, 10.0]];
        let n = Normalizer::fit(&rows, 5).unwrap();
        assert_eq!(n.mean().to_vec(), vec![3.0, 10.0]);
        // constant column keeps unit scale
        assert_eq!(n.scale()[1], 1.0);
        let z = n.transform(&[3.0, 12.0]).unwrap();
        assert!(z[0].abs() < 1e-12);
        assert!((z[1] - 2.0).abs() < 1e-12);

        let m = n.transform_matrix(&rows).unwrap();
        let col_mean: f64 = m.column(0).sum() / 5.0;
        assert!(col_mean.abs() < 1e-12);
    }

    #[test]
    fn transform_is_pure() {
        let rows = array![[1.0, 0.0], [2.0, 5.0], [4.0, 1.0], [8.0, 3.0], [16.0, 2.0]];
        let n = Normalizer::fit(&rows, 5).unwrap();
        let a = n.transform(&[5.0, 5.0]).unwrap();
        let b = n.transform(&[5.0, 5.0]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let rows = array![[1.0, 0.0], [2.0, 5.0], [4.0, 1.0], [8.0, 3.0], [16.0, 2.0]];
        let n = Normalizer::fit(&rows, 5).unwrap();
        assert!(matches!(
            n.transform(&[1.0, 2.0, 3.0]),
            Err(AgentError::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert!(matches!(
            n.transform(&[f64::NAN, 2.0]),
            Err(AgentError::NonFinite(_))
        ));
    }
}
