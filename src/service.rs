//! Anomaly Service
//!
//! Entry point for callers: validates requests, fits and refits baselines,
//! persists them through a [`ModelStore`] and scores query points.

use crate::analytics::{AnomalyDetector, DetectionReport, StatisticalModel};
use crate::config::BaselineConfig;
use crate::error::{Error, Result, StoreError};
use crate::store::{open_store, ModelStore, UserToken};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts at drawing an unused generated run id
const MAX_RUN_ID_ATTEMPTS: u32 = 8;

/// Training batch for fit or update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingDataRequest {
    pub user_token: UserToken,
    /// Generated on fit when absent; required on update
    #[serde(default)]
    pub run_id: Option<String>,
    pub training_data: Vec<Vec<f64>>,
}

/// Point to score against a stored baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPoint {
    pub user_token: UserToken,
    pub run_id: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub user_token: UserToken,
    pub run_id: String,
}

/// State of a baseline after an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub run_id: String,
    pub samples: usize,
    pub dimensions: usize,
}

/// Fit, update, score and delete baselines on top of a model store
#[derive(Debug)]
pub struct AnomalyService {
    store: Arc<dyn ModelStore>,
    detector: AnomalyDetector,
    timeout: Duration,
    max_update_retries: u32,
}

impl AnomalyService {
    pub fn new(store: Arc<dyn ModelStore>, detector: AnomalyDetector) -> Self {
        Self {
            store,
            detector,
            timeout: Duration::from_secs(10),
            max_update_retries: 5,
        }
    }

    /// Open the configured store and build a service over it
    pub async fn from_config(config: &BaselineConfig) -> Result<Self> {
        let store = open_store(&config.storage).await?;
        Ok(Self::new(store, AnomalyDetector::new(config.detector.clone()))
            .with_timeout(config.storage.timeout())
            .with_max_update_retries(config.storage.max_update_retries))
    }

    /// Upper bound for each store call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_update_retries(mut self, retries: u32) -> Self {
        self.max_update_retries = retries.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    /// Fit a baseline and store it; returns the run id.
    ///
    /// An explicit run id is upserted: an existing model is replaced and the
    /// caller is added to its access set. Without one, a fresh id is drawn.
    pub async fn fit(&self, request: &TrainingDataRequest) -> Result<String> {
        let model = StatisticalModel::fit(&request.training_data)?;

        let run_id = match request.run_id.as_deref().filter(|id| !id.is_empty()) {
            Some(run_id) => {
                self.bounded(self.store.save(request.user_token, run_id, &model))
                    .await?;
                run_id.to_string()
            }
            None => self.create_generated(request.user_token, &model).await?,
        };

        info!(
            "Fitted run {} ({} samples, {} dimensions)",
            run_id,
            model.sample_count(),
            model.dimensions()
        );
        Ok(run_id)
    }

    /// Merge a batch into an existing baseline and refit over all samples
    pub async fn update(&self, request: &TrainingDataRequest) -> Result<ModelSummary> {
        let run_id = request
            .run_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::InvalidInput("run_id is required to update a model".into()))?;

        for attempt in 1..=self.max_update_retries {
            let current = self
                .bounded(self.store.load_versioned(request.user_token, run_id))
                .await?
                .ok_or(Error::NotFound)?;

            let merged = current.model.update(&request.training_data)?;

            let replaced = self
                .bounded(self.store.replace(
                    request.user_token,
                    run_id,
                    &current.revision,
                    &merged,
                ))
                .await?;
            if replaced {
                info!(
                    "Updated run {} to {} samples",
                    run_id,
                    merged.sample_count()
                );
                return Ok(ModelSummary {
                    run_id: run_id.to_string(),
                    samples: merged.sample_count(),
                    dimensions: merged.dimensions(),
                });
            }

            warn!(
                "Run {} changed during update (attempt {}/{})",
                run_id, attempt, self.max_update_retries
            );
        }

        Err(StoreError::Conflict(format!("run {} kept changing during update", run_id)).into())
    }

    /// Score a point against the stored baseline
    pub async fn detect(&self, point: &DataPoint) -> Result<DetectionReport> {
        require_run_id(&point.run_id)?;
        AnomalyDetector::validate_query(&point.values)?;

        let model = self
            .bounded(self.store.load(point.user_token, &point.run_id))
            .await?
            .ok_or(Error::NotFound)?;

        let report = self.detector.detect(&model, &point.values)?;
        debug!(
            "Scored point for run {}: anomaly={}",
            point.run_id, report.anomaly_detected
        );
        Ok(report)
    }

    /// Delete a baseline; `false` when it does not exist or the caller has no access
    pub async fn delete(&self, user_token: UserToken, run_id: &str) -> Result<bool> {
        require_run_id(run_id)?;

        let removed = self.bounded(self.store.delete(user_token, run_id)).await?;
        if removed {
            info!("Deleted run {}", run_id);
        }
        Ok(removed)
    }

    /// Close the underlying store
    pub async fn close(&self) -> Result<()> {
        self.bounded(self.store.close()).await
    }

    async fn create_generated(&self, user_token: UserToken, model: &StatisticalModel) -> Result<String> {
        for _ in 0..MAX_RUN_ID_ATTEMPTS {
            let run_id = generate_run_id();
            if self
                .bounded(self.store.create(user_token, &run_id, model))
                .await?
            {
                return Ok(run_id);
            }
            debug!("Generated run id {} already taken", run_id);
        }

        Err(StoreError::Conflict(format!(
            "no unused run id after {} attempts",
            MAX_RUN_ID_ATTEMPTS
        ))
        .into())
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                warn!(
                    "{} store call timed out after {:?}",
                    self.store.backend(),
                    self.timeout
                );
                Err(StoreError::Timeout(self.timeout).into())
            }
        }
    }
}

/// Eight lowercase hex characters from a v4 UUID
pub fn generate_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

fn require_run_id(run_id: &str) -> Result<()> {
    if run_id.is_empty() {
        return Err(Error::InvalidInput("run_id cannot be empty".to_string()));
    }
    Ok(())
}
