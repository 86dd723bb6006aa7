//! Analytics Module
//!
//! Statistical baselines and anomaly scoring

pub mod anomaly;
pub mod model;

pub use anomaly::{
    AnomalyDetector, DetectionReport, DetectorConfig, MahalanobisBasis, MahalanobisMode,
};
pub use model::StatisticalModel;
