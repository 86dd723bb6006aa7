use super::{ModelRecord, ModelStore, Revision, StorageBackend, UserToken, VersionedModel};
use crate::analytics::StatisticalModel;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory model store
///
/// Records live in a `HashMap` behind one `RwLock`; every mutating call takes
/// the write lock for its whole read-modify-write.
/// Data is lost when the process exits.
#[derive(Debug, Clone, Default)]
pub struct MemoryModelStore {
    records: Arc<RwLock<HashMap<String, ModelRecord>>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Access set of `run_id`, for tests and diagnostics
    pub async fn access_of(&self, run_id: &str) -> Option<Vec<UserToken>> {
        let records = self.records.read().await;
        records
            .get(run_id)
            .map(|record| record.access.iter().copied().collect())
    }
}

#[async_trait]
impl ModelStore for MemoryModelStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }

    async fn save(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(run_id) {
            Some(record) => record.upsert(user_token, model.clone()),
            None => {
                records.insert(
                    run_id.to_string(),
                    ModelRecord::new(run_id, user_token, model.clone()),
                );
            }
        }
        Ok(())
    }

    async fn create(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(run_id) {
            return Ok(false);
        }
        records.insert(
            run_id.to_string(),
            ModelRecord::new(run_id, user_token, model.clone()),
        );
        Ok(true)
    }

    async fn load_versioned(
        &self,
        user_token: UserToken,
        run_id: &str,
    ) -> Result<Option<VersionedModel>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(run_id)
            .filter(|record| record.grants(user_token))
            .map(|record| VersionedModel {
                model: record.model.clone(),
                revision: Revision::from(record.revision),
            }))
    }

    async fn replace(
        &self,
        user_token: UserToken,
        run_id: &str,
        expected: &Revision,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(run_id) {
            Some(record)
                if record.grants(user_token) && Revision::from(record.revision) == *expected =>
            {
                record.upsert(user_token, model.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, user_token: UserToken, run_id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        if records
            .get(run_id)
            .map_or(false, |record| record.grants(user_token))
        {
            records.remove(run_id);
            return Ok(true);
        }
        Ok(false)
    }
}
