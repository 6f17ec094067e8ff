//! Structured logging setup and one-line JSON audit records.

mod format;

pub use format::{PredictionLine, StructuredLogger};
