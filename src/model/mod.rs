//! Statistical models: the isolation-forest anomaly detector and the optional
//! recurrent trend refiner.

mod isolation_forest;
mod sequence;

pub use isolation_forest::{average_path_length, IsolationForest, IsolationForestParams};
pub use sequence::{SequenceRefiner, TrainedRefiner};
