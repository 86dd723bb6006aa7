//! Model Store
//!
//! Durable mapping from run identifier to a fitted [`StatisticalModel`] and
//! the set of user tokens allowed to use it.
//!
//! Every backend checks access inside the same operation that reads or writes
//! the record. A run that does not exist and a run the caller has no grant for
//! produce the same outcome (`None` / `false`), so callers cannot probe for
//! runs owned by other tenants.

pub mod config;
pub mod file;
pub mod memory;
#[cfg(feature = "mongodb-backend")]
pub mod mongodb;
pub mod object;

use crate::analytics::StatisticalModel;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub use config::{
    FileStoreConfig, MongoStoreConfig, ObjectStoreConfig, StorageBackend, StorageConfig,
};
pub use file::FileModelStore;
pub use memory::MemoryModelStore;
#[cfg(feature = "mongodb-backend")]
pub use self::mongodb::MongoModelStore;
pub use object::ObjectModelStore;

/// Opaque caller identifier
pub type UserToken = i64;

/// Write version of a stored record, used for conditional replacement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for Revision {
    fn from(counter: u64) -> Self {
        Self(counter.to_string())
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A model together with the revision it was read at
#[derive(Debug, Clone)]
pub struct VersionedModel {
    pub model: StatisticalModel,
    pub revision: Revision,
}

/// Persisted record: one per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub run_id: String,
    pub access: BTreeSet<UserToken>,
    /// Bumped by every write
    #[serde(default)]
    pub revision: u64,
    pub model: StatisticalModel,
}

impl ModelRecord {
    /// Fresh record owned by `user_token`
    pub fn new(run_id: impl Into<String>, user_token: UserToken, model: StatisticalModel) -> Self {
        Self {
            run_id: run_id.into(),
            access: BTreeSet::from([user_token]),
            revision: 1,
            model,
        }
    }

    pub fn grants(&self, user_token: UserToken) -> bool {
        self.access.contains(&user_token)
    }

    /// Replace the model, add `user_token` to the access set and bump the revision
    pub fn upsert(&mut self, user_token: UserToken, model: StatisticalModel) {
        self.model = model;
        self.access.insert(user_token);
        self.revision += 1;
    }
}

/// Access-gated model persistence.
///
/// Implementations must make each method a single atomic step with respect to
/// other calls for the same `run_id`, relying on the backend's own primitive
/// (lock, conditional write, atomic upsert) rather than a caller-side lock.
#[async_trait]
pub trait ModelStore: Send + Sync + std::fmt::Debug {
    /// Backend kind, for diagnostics
    fn backend(&self) -> StorageBackend;

    /// Create or replace the model for `run_id` and grant `user_token` access.
    ///
    /// The grant is a set union; repeated saves never duplicate a token.
    async fn save(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<(), StoreError>;

    /// Insert a new record only if `run_id` is unused.
    ///
    /// Returns `false` when a record already exists.
    async fn create(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError>;

    /// Model and revision, if `user_token` has access to `run_id`
    async fn load_versioned(
        &self,
        user_token: UserToken,
        run_id: &str,
    ) -> Result<Option<VersionedModel>, StoreError>;

    /// Model, if `user_token` has access to `run_id`
    async fn load(
        &self,
        user_token: UserToken,
        run_id: &str,
    ) -> Result<Option<StatisticalModel>, StoreError> {
        Ok(self
            .load_versioned(user_token, run_id)
            .await?
            .map(|versioned| versioned.model))
    }

    /// Overwrite the model only if the record is still at `expected`.
    ///
    /// Returns `false` when the revision moved, the record is gone, or
    /// `user_token` no longer has access.
    async fn replace(
        &self,
        user_token: UserToken,
        run_id: &str,
        expected: &Revision,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError>;

    /// Remove the record if `user_token` has access; report whether it was removed
    async fn delete(&self, user_token: UserToken, run_id: &str) -> Result<bool, StoreError>;

    /// Release backend resources
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Construct the backend selected by `config`
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn ModelStore>, StoreError> {
    config.validate()?;

    let store: Arc<dyn ModelStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryModelStore::new()),
        StorageBackend::File => Arc::new(FileModelStore::open(&config.file.dir).await?),
        StorageBackend::Object => Arc::new(ObjectModelStore::new(
            config.object.clone(),
            config.timeout(),
            config.max_update_retries,
        )?),
        #[cfg(feature = "mongodb-backend")]
        StorageBackend::MongoDb => {
            Arc::new(MongoModelStore::connect(&config.mongodb, config.timeout()).await?)
        }
        #[cfg(not(feature = "mongodb-backend"))]
        StorageBackend::MongoDb => {
            return Err(StoreError::Configuration(
                "MongoDB backend not enabled. Please build with --features mongodb-backend"
                    .to_string(),
            ))
        }
    };

    tracing::info!("Model store opened: {}", store.backend());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_upsert_grants_once() {
        let model = StatisticalModel::fit(&[vec![1.0], vec![2.0]]).unwrap();
        let mut record = ModelRecord::new("r1", 7, model.clone());
        record.upsert(7, model.clone());
        record.upsert(8, model);

        assert_eq!(record.access, BTreeSet::from([7, 8]));
        assert_eq!(record.revision, 3);
        assert!(record.grants(8));
        assert!(!record.grants(9));
    }

    #[test]
    fn test_record_shape() {
        let model = StatisticalModel::fit(&[vec![1.0]]).unwrap();
        let json = serde_json::to_value(ModelRecord::new("r1", 42, model)).unwrap();
        assert_eq!(json["run_id"], "r1");
        assert_eq!(json["access"], serde_json::json!([42]));
        assert!(json["model"]["means"].is_array());
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.backend(), StorageBackend::Memory);
        store.close().await.unwrap();
    }
}
