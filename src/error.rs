//! Error kinds. Public predict/optimize paths turn these into degraded results;
//! everything below that boundary propagates them with `?`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Host metrics could not be read.
    #[error("metric collection failed: {0}")]
    Collection(String),

    /// Not enough history to fit a model.
    #[error("insufficient history: got {got} samples, need {need}")]
    InsufficientHistory { got: usize, need: usize },

    /// Model queried before it was fitted.
    #[error("anomaly model is not fitted")]
    NotFitted,

    /// Input row width does not match the fitted state.
    #[error("dimension mismatch: expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// NaN or infinite value in a feature row.
    #[error("non-finite value in feature '{0}'")]
    NonFinite(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("encryption error")]
    Crypto,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted model does not match its recorded checksum.
    #[error("model checksum mismatch for {0}")]
    ChecksumMismatch(String),
}

/// Failure of a single optimizer action.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),
}

/// Alert dispatch failure.
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("alert transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("alert rejected: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("alert delivery failed: {0}")]
    Other(String),
}
