//! Statistical Baseline Model
//!
//! Per-run summary statistics over a multivariate training matrix.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fitted baseline for one run.
///
/// `data_points` keeps the raw training rows so that an update can refit over
/// the merged matrix instead of approximating moments incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalModel {
    /// Column means
    pub means: Vec<f64>,
    /// Column sample standard deviations (divisor n-1, 0 for a single row)
    pub stds: Vec<f64>,
    /// Sample covariance across columns, absent for a single row
    #[serde(default)]
    pub cov: Option<Vec<Vec<f64>>>,
    /// Raw training rows
    pub data_points: Vec<Vec<f64>>,
}

impl StatisticalModel {
    /// Fit a model over a rectangular matrix of finite values
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let data = to_matrix(rows)?;
        let (means, stds, cov) = summarize(&data);
        if !statistics_are_finite(&means, &stds, cov.as_ref()) {
            return Err(Error::InvalidInput(
                "training values are too large to summarize".to_string(),
            ));
        }

        debug!(
            "Fitted baseline over {} rows x {} columns",
            data.nrows(),
            data.ncols()
        );

        Ok(Self {
            means: means.to_vec(),
            stds: stds.to_vec(),
            cov: cov.map(|c| rows_of(&c)),
            data_points: rows.to_vec(),
        })
    }

    /// Append `rows` to the stored samples and refit over the merged matrix
    pub fn update(&self, rows: &[Vec<f64>]) -> Result<Self> {
        let batch = to_matrix(rows)?;
        if batch.ncols() != self.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions(),
                actual: batch.ncols(),
            });
        }

        let mut merged = Vec::with_capacity(self.data_points.len() + rows.len());
        merged.extend_from_slice(&self.data_points);
        merged.extend_from_slice(rows);
        Self::fit(&merged)
    }

    /// Number of metric dimensions
    pub fn dimensions(&self) -> usize {
        self.means.len()
    }

    /// Number of training rows behind the statistics
    pub fn sample_count(&self) -> usize {
        self.data_points.len()
    }

    /// Check the shape invariants of a model read back from storage
    pub fn check_consistency(&self) -> Result<()> {
        let dims = self.dimensions();
        let cov_ok = self
            .cov
            .as_ref()
            .map_or(true, |c| c.len() == dims && c.iter().all(|r| r.len() == dims));
        let rows_ok = self.data_points.iter().all(|r| r.len() == dims);
        let finite = self.means.iter().chain(&self.stds).all(|v| v.is_finite())
            && self
                .cov
                .iter()
                .flatten()
                .flatten()
                .all(|v| v.is_finite());

        if dims == 0 || self.stds.len() != dims || !cov_ok || !rows_ok || !finite {
            return Err(Error::Backend(crate::error::StoreError::Backend(format!(
                "stored model is inconsistent ({} means, {} stds)",
                dims,
                self.stds.len()
            ))));
        }
        Ok(())
    }
}

/// Validate rows and pack them into a matrix
pub(crate) fn to_matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let first = rows
        .first()
        .ok_or_else(|| Error::InvalidInput("training data is empty".to_string()))?;
    let cols = first.len();
    if cols == 0 {
        return Err(Error::InvalidInput(
            "training rows must have at least one column".to_string(),
        ));
    }

    let mut flat = Vec::with_capacity(rows.len() * cols);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != cols {
            return Err(Error::InvalidInput(format!(
                "row {} has {} columns, expected {}",
                i,
                row.len(),
                cols
            )));
        }
        if let Some(j) = row.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "row {} column {} is not a finite number",
                i, j
            )));
        }
        flat.extend_from_slice(row);
    }

    Array2::from_shape_vec((rows.len(), cols), flat)
        .map_err(|e| Error::InvalidInput(format!("training data shape: {}", e)))
}

/// Sample covariance of the columns of `data` (rows are observations).
///
/// Requires at least two rows.
pub(crate) fn covariance(data: &Array2<f64>) -> Array2<f64> {
    let n = data.nrows();
    let means = column_means(data);
    let centered = data - &means;
    centered.t().dot(&centered) / (n as f64 - 1.0)
}

fn column_means(data: &Array2<f64>) -> Array1<f64> {
    data.sum_axis(Axis(0)) / data.nrows() as f64
}

fn summarize(data: &Array2<f64>) -> (Array1<f64>, Array1<f64>, Option<Array2<f64>>) {
    let means = column_means(data);

    // Bessel's correction is undefined for one row; that row is its own mean.
    if data.nrows() < 2 {
        let stds = Array1::zeros(data.ncols());
        return (means, stds, None);
    }

    let stds = data.std_axis(Axis(0), 1.0);
    let cov = covariance(data);
    (means, stds, Some(cov))
}

/// Column sums and squared deviations can overflow even for finite input
fn statistics_are_finite(
    means: &Array1<f64>,
    stds: &Array1<f64>,
    cov: Option<&Array2<f64>>,
) -> bool {
    means.iter().chain(stds.iter()).all(|v| v.is_finite())
        && cov.map_or(true, |c| c.iter().all(|v| v.is_finite()))
}

fn rows_of(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}
