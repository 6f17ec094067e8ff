//! AutoSense agent: single-host degradation risk scoring and auto-optimization.
//!
//! Modular structure:
//! - [`collectors`]: Host metric snapshots (CPU, memory, disk, network, process census)
//! - [`features`]: Named feature vectors, normalization, recent-snapshot window
//! - [`model`]: Isolation-forest anomaly detector and recurrent trend refiner
//! - [`risk`]: Risk scoring engine, explanations and recommendations
//! - [`optimizer`]: Threshold-driven mitigation actions
//! - [`storage`]: Encrypted local history/prediction store
//! - [`alert`]: Cooldown-gated alert delivery
//! - [`logging`]: Structured JSON logging

pub mod config;
pub mod error;
pub mod collectors;
pub mod features;
pub mod model;
pub mod risk;
pub mod optimizer;
pub mod storage;
pub mod alert;
pub mod logging;

pub use config::AgentConfig;
pub use error::{AgentError, ActionError, AlertError};
pub use collectors::{FeatureSource, HostCollector};
pub use features::{FeatureVector, FeatureWindow, HistoryRecord, Normalizer};
pub use model::{IsolationForest, SequenceRefiner};
pub use risk::{RiskEngine, RiskLevel, RiskPrediction};
pub use optimizer::{ActionExecutor, AutoOptimizer, HostActions, OptimizationResult};
pub use storage::{HistorySource, PredictionSink, SecureStore};
pub use alert::{AlertChannel, AlertOutcome};
pub use logging::StructuredLogger;
