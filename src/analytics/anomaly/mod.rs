//! Anomaly Detection Module
//!
//! Multi-statistic scoring of a query point against a fitted baseline

mod detector;
mod types;

pub use detector::AnomalyDetector;
pub use types::{DetectionReport, DetectorConfig, MahalanobisBasis, MahalanobisMode};
