//! # baseline-rs
//!
//! Per-run statistical baselines over multivariate samples, with anomaly
//! scoring against the stored baseline.
//!
//! A training batch is summarized into a [`StatisticalModel`] (means, sample
//! standard deviations, covariance, raw rows) and persisted through a
//! [`ModelStore`] under a run id, with the submitting user token granted
//! access. Query points are scored by the [`AnomalyDetector`] using the
//! largest z-score, the smallest per-dimension Gaussian density and a
//! Mahalanobis distance.
//!
//! ```rust,no_run
//! use baseline_rs::{AnomalyService, BaselineConfig, DataPoint, TrainingDataRequest};
//!
//! # async fn example() -> baseline_rs::Result<()> {
//! let service = AnomalyService::from_config(&BaselineConfig::load(None)?).await?;
//!
//! let run_id = service
//!     .fit(&TrainingDataRequest {
//!         user_token: 1234,
//!         run_id: None,
//!         training_data: vec![vec![10.0, 20.0], vec![15.0, 25.0], vec![12.0, 22.0]],
//!     })
//!     .await?;
//!
//! let report = service
//!     .detect(&DataPoint { user_token: 1234, run_id, values: vec![500.0, 600.0] })
//!     .await?;
//! assert!(report.anomaly_detected);
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod config;
pub mod error;
pub mod logging;
pub mod service;
pub mod store;

pub use analytics::{AnomalyDetector, DetectionReport, DetectorConfig, StatisticalModel};
pub use config::BaselineConfig;
pub use error::{Error, ErrorKind, Result, StoreError};
pub use service::{AnomalyService, DataPoint, DeleteRequest, ModelSummary, TrainingDataRequest};
pub use store::{open_store, ModelStore, StorageBackend, UserToken};
