//! Anomaly Detection Types
//!
//! Detector settings and the scoring report.

use serde::{Deserialize, Serialize};

/// Covariance used for the Mahalanobis distance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MahalanobisMode {
    /// Covariance of the two rows `[means, x]`.
    ///
    /// Rank one by construction, so the pseudo-inverse yields `sqrt(2)` for
    /// any `x != means`. Kept as the default for compatibility with stored
    /// deployments.
    #[default]
    QueryPair,
    /// Covariance of the training sample
    TrainingCovariance,
}

/// Where a reported Mahalanobis distance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MahalanobisBasis {
    /// Two-row `[means, x]` covariance (see [`MahalanobisMode::QueryPair`])
    QueryPairCovariance,
    /// Stored training covariance
    TrainingCovariance,
    /// Model has no covariance; the z-score statistic was reused
    ZScoreFallback,
}

/// Detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Flag when the largest |z| exceeds this
    pub z_threshold: f64,
    /// Flag when the smallest per-dimension density falls below this
    pub density_threshold: f64,
    /// Flag when the Mahalanobis distance exceeds this
    pub mahalanobis_threshold: f64,
    /// Covariance basis for the Mahalanobis distance
    pub mahalanobis_mode: MahalanobisMode,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            density_threshold: 0.01,
            mahalanobis_threshold: 3.0,
            mahalanobis_mode: MahalanobisMode::QueryPair,
        }
    }
}

/// Scores for one query point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Largest absolute z-score across dimensions
    pub z_score_anomaly: f64,
    /// Smallest Gaussian density across dimensions with non-zero spread
    pub gaussian_probability: Option<f64>,
    /// `gaussian_probability` over that dimension's density at its mean
    pub normalized_probability: Option<f64>,
    pub mahalanobis_distance: f64,
    pub mahalanobis_basis: MahalanobisBasis,
    /// Any one statistic crossing its threshold
    pub anomaly_detected: bool,
}
