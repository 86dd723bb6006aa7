//! Anomaly Detector Implementation
//!
//! Scores a query point against a fitted baseline with three statistics:
//! the largest z-score, the smallest per-dimension Gaussian density, and a
//! Mahalanobis distance. Any one of them crossing its threshold flags the
//! point.

use super::types::{DetectionReport, DetectorConfig, MahalanobisBasis, MahalanobisMode};
use crate::analytics::model::StatisticalModel;
use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{Continuous, Normal};
use std::f64::consts::SQRT_2;
use tracing::debug;

/// Relative singular value cutoff for the pseudo-inverse
const PINV_RCOND: f64 = 1e-15;

/// Sweep limit for the SVD; unbounded sweeps never return on inf/NaN input
const SVD_MAX_ITERATIONS: usize = 1_000;

/// Anomaly detector
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: DetectorConfig,
}

impl AnomalyDetector {
    /// Create a detector with the given thresholds
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Thresholds and Mahalanobis mode in use
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Score `values` against `model`
    pub fn detect(&self, model: &StatisticalModel, values: &[f64]) -> Result<DetectionReport> {
        Self::validate_query(values)?;
        model.check_consistency()?;
        if values.len() != model.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: model.dimensions(),
                actual: values.len(),
            });
        }

        if let Some(j) = values
            .iter()
            .zip(&model.means)
            .position(|(x, m)| !(x - m).is_finite())
        {
            return Err(Error::InvalidInput(format!(
                "query value {} is out of range for this baseline",
                j
            )));
        }

        let z = max_abs_z_score(values, &model.means, &model.stds);
        let density = min_gaussian_density(values, &model.means, &model.stds)?;
        let (mahalanobis, basis) = self.mahalanobis(model, values, z)?;

        let anomaly_detected = z > self.config.z_threshold
            || density.map_or(false, |(d, _)| d < self.config.density_threshold)
            || mahalanobis > self.config.mahalanobis_threshold;

        debug!(
            "z={:.4} density={:?} mahalanobis={:.4} ({:?}) anomaly={}",
            z,
            density.map(|(d, _)| d),
            mahalanobis,
            basis,
            anomaly_detected
        );

        Ok(DetectionReport {
            z_score_anomaly: z,
            gaussian_probability: density.map(|(d, _)| d),
            normalized_probability: density.map(|(_, n)| n),
            mahalanobis_distance: mahalanobis,
            mahalanobis_basis: basis,
            anomaly_detected,
        })
    }

    /// Reject empty or non-finite query vectors
    pub fn validate_query(values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Err(Error::InvalidInput("query vector is empty".to_string()));
        }
        if let Some(j) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "query value {} is not a finite number",
                j
            )));
        }
        Ok(())
    }

    fn mahalanobis(
        &self,
        model: &StatisticalModel,
        values: &[f64],
        z: f64,
    ) -> Result<(f64, MahalanobisBasis)> {
        let Some(training_cov) = model.cov.as_ref() else {
            return Ok((z, MahalanobisBasis::ZScoreFallback));
        };

        let dims = model.dimensions();
        let diff = DVector::from_iterator(
            dims,
            values.iter().zip(&model.means).map(|(x, m)| x - m),
        );

        let basis = match self.config.mahalanobis_mode {
            MahalanobisMode::QueryPair => MahalanobisBasis::QueryPairCovariance,
            MahalanobisMode::TrainingCovariance => MahalanobisBasis::TrainingCovariance,
        };
        if diff.iter().all(|d| *d == 0.0) {
            return Ok((0.0, basis));
        }

        match self.config.mahalanobis_mode {
            // cov([means, x]) = d·dᵀ/2 has rank one and dᵀ·pinv(d·dᵀ/2)·d = 2
            MahalanobisMode::QueryPair => Ok((SQRT_2, basis)),
            MahalanobisMode::TrainingCovariance => {
                let cov = DMatrix::from_fn(dims, dims, |i, j| training_cov[i][j]);
                let inv = pseudo_inverse(cov)?;
                // unit-scaled so the quadratic form cannot overflow
                let scale = diff.amax();
                let unit = &diff / scale;
                let squared = unit.dot(&(inv * &unit));
                // rounding can push an exact zero slightly negative
                Ok((scale * squared.max(0.0).sqrt(), basis))
            }
        }
    }
}

fn max_abs_z_score(values: &[f64], means: &[f64], stds: &[f64]) -> f64 {
    values
        .iter()
        .zip(means.iter().zip(stds))
        .map(|(x, (m, s))| if *s > 0.0 { ((x - m) / s).abs() } else { 0.0 })
        .fold(0.0, f64::max)
}

/// Smallest density and its ratio to the same dimension's peak density.
///
/// Dimensions with zero spread have no density and are skipped; `None` when
/// every dimension is degenerate.
fn min_gaussian_density(
    values: &[f64],
    means: &[f64],
    stds: &[f64],
) -> Result<Option<(f64, f64)>> {
    let mut lowest: Option<(f64, f64)> = None;

    for ((x, m), s) in values.iter().zip(means).zip(stds) {
        if *s <= 0.0 {
            continue;
        }
        let normal = Normal::new(*m, *s)
            .map_err(|e| Error::InvalidInput(format!("gaussian N({}, {}): {}", m, s, e)))?;
        let density = normal.pdf(*x);
        if lowest.map_or(true, |(d, _)| density < d) {
            lowest = Some((density, normal.pdf(*m)));
        }
    }

    Ok(lowest.map(|(density, peak)| (density, density / peak)))
}

fn pseudo_inverse(matrix: DMatrix<f64>) -> Result<DMatrix<f64>> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput(
            "covariance has non-finite entries".to_string(),
        ));
    }
    let svd = matrix
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITERATIONS)
        .ok_or_else(|| Error::InvalidInput("covariance SVD did not converge".to_string()))?;
    let cutoff = PINV_RCOND * svd.singular_values.max();
    svd.pseudo_inverse(cutoff)
        .map_err(|e| Error::InvalidInput(format!("pseudo-inverse: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fitted() -> StatisticalModel {
        StatisticalModel::fit(&[
            vec![10.0, 20.0, 30.0],
            vec![15.0, 25.0, 35.0],
            vec![12.0, 22.0, 32.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_detect_normal_point() {
        let detector = AnomalyDetector::default();
        let report = detector.detect(&fitted(), &[11.0, 21.0, 31.0]).unwrap();

        assert!(report.z_score_anomaly < 1.0);
        assert!(report.gaussian_probability.unwrap() > 0.01);
        assert!(!report.anomaly_detected);
    }

    #[test]
    fn test_detect_obvious_anomaly() {
        let detector = AnomalyDetector::default();
        let report = detector.detect(&fitted(), &[500.0, 600.0, 700.0]).unwrap();

        assert!(report.z_score_anomaly > 100.0);
        assert!(report.anomaly_detected);
    }

    #[test]
    fn test_mean_row_scores_zero() {
        let model = fitted();
        let means = model.means.clone();
        let report = AnomalyDetector::default().detect(&model, &means).unwrap();

        assert_eq!(report.z_score_anomaly, 0.0);
        assert!((report.normalized_probability.unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(report.mahalanobis_distance, 0.0);
        assert!(!report.anomaly_detected);
    }

    #[test]
    fn test_query_pair_mahalanobis_is_sqrt_two() {
        let report = AnomalyDetector::default()
            .detect(&fitted(), &[500.0, 600.0, 700.0])
            .unwrap();

        assert_eq!(
            report.mahalanobis_basis,
            MahalanobisBasis::QueryPairCovariance
        );
        assert!((report.mahalanobis_distance - 2.0_f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_training_covariance_mode() {
        let detector = AnomalyDetector::new(DetectorConfig {
            mahalanobis_mode: MahalanobisMode::TrainingCovariance,
            ..Default::default()
        });
        let model = StatisticalModel::fit(&[
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
            vec![0.0, -1.0],
        ])
        .unwrap();
        // cov = diag(2/3, 2/3)
        let report = detector.detect(&model, &[2.0, 0.0]).unwrap();

        assert_eq!(report.mahalanobis_basis, MahalanobisBasis::TrainingCovariance);
        assert!((report.mahalanobis_distance - 6.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_single_row_model_falls_back_to_z_score() {
        let model = StatisticalModel::fit(&[vec![1.0, 2.0]]).unwrap();
        let report = AnomalyDetector::default().detect(&model, &[5.0, 9.0]).unwrap();

        assert_eq!(report.z_score_anomaly, 0.0);
        assert_eq!(report.gaussian_probability, None);
        assert_eq!(report.normalized_probability, None);
        assert_eq!(report.mahalanobis_basis, MahalanobisBasis::ZScoreFallback);
        assert!(!report.anomaly_detected);
    }

    #[test]
    fn test_constant_column_is_ignored_by_z_and_density() {
        let model = StatisticalModel::fit(&[vec![1.0, 5.0], vec![3.0, 5.0]]).unwrap();
        let report = AnomalyDetector::default().detect(&model, &[2.0, 50.0]).unwrap();

        assert_eq!(report.z_score_anomaly, 0.0);
        assert!(report.gaussian_probability.is_some());
    }

    #[test]
    fn test_low_density_alone_flags() {
        let detector = AnomalyDetector::new(DetectorConfig {
            z_threshold: f64::MAX,
            mahalanobis_threshold: f64::MAX,
            ..Default::default()
        });
        // wide spread keeps every density under 0.01
        let model = StatisticalModel::fit(&[vec![0.0], vec![100.0]]).unwrap();
        let report = detector.detect(&model, &[50.0]).unwrap();

        assert!(report.gaussian_probability.unwrap() < 0.01);
        assert!(report.anomaly_detected);
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = AnomalyDetector::default().detect(&fitted(), &[1.0, 2.0]);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_far_query_scores_without_hanging() {
        let report = AnomalyDetector::default()
            .detect(&fitted(), &[1e200, 21.0, 31.0])
            .unwrap();

        assert!(report.anomaly_detected);
        assert!(report.z_score_anomaly.is_finite());
        assert_eq!(report.mahalanobis_distance, 2.0_f64.sqrt());

        let detector = AnomalyDetector::new(DetectorConfig {
            mahalanobis_mode: MahalanobisMode::TrainingCovariance,
            ..Default::default()
        });
        let report = detector.detect(&fitted(), &[1e200, 21.0, 31.0]).unwrap();
        assert!(report.mahalanobis_distance.is_finite());
        assert!(report.mahalanobis_distance > 1e150);
    }

    #[test]
    fn test_query_overflowing_the_baseline_is_rejected() {
        let model = StatisticalModel::fit(&[vec![-1e308, 0.5]]).unwrap();
        let result = AnomalyDetector::default().detect(&model, &[1e308, 0.5]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_non_finite_covariance_is_rejected() {
        let cov = DMatrix::from_row_slice(2, 2, &[f64::INFINITY, 0.0, 0.0, 1.0]);
        assert!(matches!(pseudo_inverse(cov), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_invalid_query() {
        let detector = AnomalyDetector::default();
        assert!(matches!(
            detector.detect(&fitted(), &[]),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            detector.detect(&fitted(), &[1.0, f64::INFINITY, 3.0]),
            Err(Error::InvalidInput(_))
        ));
    }
}
