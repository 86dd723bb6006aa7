//! Object store model storage
//!
//! Records are JSON objects in an S3-compatible bucket, addressed path-style as
//! `{endpoint}/{bucket}/{prefix}/{run_id}.json`. Concurrency control uses the
//! store's conditional requests: `If-None-Match: *` to create, `If-Match:
//! <etag>` to overwrite or delete. A `412 Precondition Failed` (or `409`)
//! means another writer won and the operation re-reads and retries.

use super::config::ObjectStoreConfig;
use super::{ModelRecord, ModelStore, Revision, StorageBackend, UserToken, VersionedModel};
use crate::analytics::StatisticalModel;
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, warn};

/// Write precondition
enum Precondition<'a> {
    /// Object must not exist yet
    Absent,
    /// Object must still carry this ETag
    Matches(&'a str),
}

#[derive(Debug)]
pub struct ObjectModelStore {
    client: Client,
    config: ObjectStoreConfig,
    max_attempts: u32,
}

impl ObjectModelStore {
    /// Build a client for `config`; no request is made until first use
    pub fn new(
        config: ObjectStoreConfig,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            max_attempts: max_attempts.max(1),
        })
    }

    fn object_url(&self, run_id: &str) -> String {
        let name = format!("{}.json", urlencoding::encode(run_id));
        let prefix = self.config.prefix.trim_matches('/');
        let endpoint = self.config.endpoint.trim_end_matches('/');

        if prefix.is_empty() {
            format!("{}/{}/{}", endpoint, self.config.bucket, name)
        } else {
            format!("{}/{}/{}/{}", endpoint, self.config.bucket, prefix, name)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn fetch(&self, run_id: &str) -> Result<Option<(ModelRecord, String)>, StoreError> {
        let response = self
            .authorize(self.client.get(self.object_url(run_id)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        StoreError::Backend(format!("object for run {} has no ETag", run_id))
                    })?;
                let bytes = response.bytes().await?;
                Ok(Some((serde_json::from_slice(&bytes)?, etag)))
            }
            status => Err(StoreError::Backend(format!(
                "GET {} returned {}",
                self.object_url(run_id),
                status
            ))),
        }
    }

    /// `Ok(false)` when the precondition did not hold
    async fn put(
        &self,
        record: &ModelRecord,
        precondition: Precondition<'_>,
    ) -> Result<bool, StoreError> {
        let body = serde_json::to_vec(record)?;
        let request = self
            .client
            .put(self.object_url(&record.run_id))
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let request = match precondition {
            Precondition::Absent => request.header(IF_NONE_MATCH, "*"),
            Precondition::Matches(etag) => request.header(IF_MATCH, etag),
        };

        let response = self.authorize(request).send().await?;
        match response.status() {
            StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StoreError::Backend(format!(
                "PUT {} returned {}",
                self.object_url(&record.run_id),
                status
            ))),
        }
    }

    /// `Ok(false)` when the object changed or is already gone
    async fn remove(&self, run_id: &str, etag: &str) -> Result<bool, StoreError> {
        let request = self
            .client
            .delete(self.object_url(run_id))
            .header(IF_MATCH, etag);

        let response = self.authorize(request).send().await?;
        match response.status() {
            StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT | StatusCode::NOT_FOUND => {
                Ok(false)
            }
            status if status.is_success() => Ok(true),
            status => Err(StoreError::Backend(format!(
                "DELETE {} returned {}",
                self.object_url(run_id),
                status
            ))),
        }
    }
}

#[async_trait]
impl ModelStore for ObjectModelStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Object
    }

    async fn save(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<(), StoreError> {
        for attempt in 1..=self.max_attempts {
            let written = match self.fetch(run_id).await? {
                Some((mut record, etag)) => {
                    record.upsert(user_token, model.clone());
                    self.put(&record, Precondition::Matches(&etag)).await?
                }
                None => {
                    let record = ModelRecord::new(run_id, user_token, model.clone());
                    self.put(&record, Precondition::Absent).await?
                }
            };
            if written {
                debug!("Saved run {} to object store", run_id);
                return Ok(());
            }
            warn!(
                "Concurrent write on run {} (attempt {}/{})",
                run_id, attempt, self.max_attempts
            );
        }
        Err(StoreError::Conflict(format!(
            "run {} kept changing during save",
            run_id
        )))
    }

    async fn create(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError> {
        let record = ModelRecord::new(run_id, user_token, model.clone());
        self.put(&record, Precondition::Absent).await
    }

    async fn load_versioned(
        &self,
        user_token: UserToken,
        run_id: &str,
    ) -> Result<Option<VersionedModel>, StoreError> {
        Ok(self
            .fetch(run_id)
            .await?
            .filter(|(record, _)| record.grants(user_token))
            .map(|(record, etag)| VersionedModel {
                model: record.model,
                revision: Revision::new(etag),
            }))
    }

    async fn replace(
        &self,
        user_token: UserToken,
        run_id: &str,
        expected: &Revision,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError> {
        match self.fetch(run_id).await? {
            Some((mut record, etag)) if record.grants(user_token) && etag == expected.as_str() => {
                record.upsert(user_token, model.clone());
                self.put(&record, Precondition::Matches(&etag)).await
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, user_token: UserToken, run_id: &str) -> Result<bool, StoreError> {
        for attempt in 1..=self.max_attempts {
            let etag = match self.fetch(run_id).await? {
                Some((record, etag)) if record.grants(user_token) => etag,
                _ => return Ok(false),
            };
            if self.remove(run_id, &etag).await? {
                return Ok(true);
            }
            warn!(
                "Run {} changed during delete (attempt {}/{})",
                run_id, attempt, self.max_attempts
            );
        }
        Err(StoreError::Conflict(format!(
            "run {} kept changing during delete",
            run_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(prefix: &str) -> ObjectModelStore {
        let config = ObjectStoreConfig {
            endpoint: "http://minio.local:9000/".to_string(),
            bucket: "baselines".to_string(),
            prefix: prefix.to_string(),
            access_token: None,
        };
        ObjectModelStore::new(config, Duration::from_secs(5), 3).unwrap()
    }

    #[test]
    fn test_object_url_layout() {
        assert_eq!(
            store("runs").object_url("r1"),
            "http://minio.local:9000/baselines/runs/r1.json"
        );
        assert_eq!(
            store("/nested/runs/").object_url("a b"),
            "http://minio.local:9000/baselines/nested/runs/a%20b.json"
        );
        assert_eq!(
            store("").object_url("r1"),
            "http://minio.local:9000/baselines/r1.json"
        );
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ObjectStoreConfig {
            bucket: String::new(),
            ..Default::default()
        };
        assert!(ObjectModelStore::new(config, Duration::from_secs(5), 3).is_err());
    }
}
