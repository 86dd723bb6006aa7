//! File-based model storage
//!
//! One JSON document per run, named after the percent-encoded run id.
//! Writes go to a temporary sibling and are renamed into place, so a reader
//! never observes a half-written record and a failed write leaves the previous
//! record intact. A directory has no compare-and-swap primitive, so calls for
//! the same run are serialized by a per-run lock held by this store.

use super::{ModelRecord, ModelStore, Revision, StorageBackend, UserToken, VersionedModel};
use crate::analytics::StatisticalModel;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FileModelStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileModelStore {
    /// Use `dir` as the model directory, creating it if needed
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        debug!("File model store at {}", dir.display());

        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, run_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", urlencoding::encode(run_id)))
    }

    fn run_lock(&self, run_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, StoreError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::Backend("run lock table poisoned".to_string()))?;
        Ok(locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    fn release_lock(&self, run_id: &str) {
        if let Ok(mut locks) = self.locks.lock() {
            // the only remaining reference is the table's own
            if locks.get(run_id).map_or(false, |l| Arc::strong_count(l) == 1) {
                locks.remove(run_id);
            }
        }
    }

    /// Run `operation` while holding the lock for `run_id`, then drop the
    /// table entry if no other caller is waiting on it
    async fn with_run_lock<T, F, Fut>(&self, run_id: &str, operation: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let result = {
            let lock = self.run_lock(run_id)?;
            let _guard = lock.lock().await;
            operation().await
        };
        self.release_lock(run_id);
        result
    }

    async fn read_record(&self, run_id: &str) -> Result<Option<ModelRecord>, StoreError> {
        match fs::read(self.record_path(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &ModelRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.run_id);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec(record)?;

        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!("Failed to remove {}: {}", tmp.display(), cleanup);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::File
    }

    async fn save(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<(), StoreError> {
        self.with_run_lock(run_id, || async move {
            let record = match self.read_record(run_id).await? {
                Some(mut record) => {
                    record.upsert(user_token, model.clone());
                    record
                }
                None => ModelRecord::new(run_id, user_token, model.clone()),
            };
            self.write_record(&record).await
        })
        .await
    }

    async fn create(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError> {
        self.with_run_lock(run_id, || async move {
            if fs::try_exists(self.record_path(run_id)).await? {
                return Ok(false);
            }
            self.write_record(&ModelRecord::new(run_id, user_token, model.clone()))
                .await?;
            Ok::<_, StoreError>(true)
        })
        .await
    }

    async fn load_versioned(
        &self,
        user_token: UserToken,
        run_id: &str,
    ) -> Result<Option<VersionedModel>, StoreError> {
        // renames are atomic, so reads need no lock
        Ok(self
            .read_record(run_id)
            .await?
            .filter(|record| record.grants(user_token))
            .map(|record| VersionedModel {
                revision: Revision::from(record.revision),
                model: record.model,
            }))
    }

    async fn replace(
        &self,
        user_token: UserToken,
        run_id: &str,
        expected: &Revision,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError> {
        self.with_run_lock(run_id, || async move {
            match self.read_record(run_id).await? {
                Some(mut record)
                    if record.grants(user_token)
                        && Revision::from(record.revision) == *expected =>
                {
                    record.upsert(user_token, model.clone());
                    self.write_record(&record).await?;
                    Ok(true)
                }
                _ => Ok::<_, StoreError>(false),
            }
        })
        .await
    }

    async fn delete(&self, user_token: UserToken, run_id: &str) -> Result<bool, StoreError> {
        self.with_run_lock(run_id, || async move {
            match self.read_record(run_id).await? {
                Some(record) if record.grants(user_token) => {
                    match fs::remove_file(self.record_path(run_id)).await {
                        Ok(()) => Ok(true),
                        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                        Err(e) => Err(StoreError::from(e)),
                    }
                }
                _ => Ok(false),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn model(value: f64) -> StatisticalModel {
        StatisticalModel::fit(&[vec![value, value * 2.0], vec![value + 1.0, value]]).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path()).await.unwrap();

        store.save(1234, "r1", &model(1.0)).await.unwrap();

        let reopened = FileModelStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load(1234, "r1").await.unwrap(), Some(model(1.0)));
        assert_eq!(reopened.load(4321, "r1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_id_is_encoded_into_file_name() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path()).await.unwrap();

        store.save(1, "../escape/attempt", &model(1.0)).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["..%2Fescape%2Fattempt.json".to_string()]);
        assert!(store.load(1, "../escape/attempt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shared_run_access() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path()).await.unwrap();

        store.save(1, "shared", &model(1.0)).await.unwrap();
        store.save(2, "shared", &model(3.0)).await.unwrap();
        store.save(2, "shared", &model(3.0)).await.unwrap();

        let raw = std::fs::read(store.record_path("shared")).unwrap();
        let record: ModelRecord = serde_json::from_slice(&raw).unwrap();
        assert_eq!(record.access.into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.load(1, "shared").await.unwrap(), Some(model(3.0)));
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path()).await.unwrap();

        assert!(store.create(1, "r1", &model(1.0)).await.unwrap());
        assert!(!store.create(1, "r1", &model(2.0)).await.unwrap());

        let v = store.load_versioned(1, "r1").await.unwrap().unwrap();
        assert!(store.replace(1, "r1", &v.revision, &model(2.0)).await.unwrap());
        assert!(!store.replace(1, "r1", &v.revision, &model(3.0)).await.unwrap());

        assert!(!store.delete(2, "r1").await.unwrap());
        assert!(store.delete(1, "r1").await.unwrap());
        assert!(!store.delete(1, "r1").await.unwrap());
        assert!(store.load(1, "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_every_grant() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileModelStore::open(dir.path()).await.unwrap());

        let handles: Vec<_> = (0..16)
            .map(|token| {
                let store = store.clone();
                tokio::spawn(async move { store.save(token, "busy", &model(1.0)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for token in 0..16 {
            assert!(store.load(token, "busy").await.unwrap().is_some());
        }
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_table_does_not_grow_with_runs() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path()).await.unwrap();

        for i in 0..50 {
            let run_id = format!("run-{}", i);
            store.save(1, &run_id, &model(1.0)).await.unwrap();
            assert!(!store.create(1, &run_id, &model(1.0)).await.unwrap());
            let v = store.load_versioned(1, &run_id).await.unwrap().unwrap();
            assert!(store.replace(1, &run_id, &v.revision, &model(2.0)).await.unwrap());
        }
        assert!(!store.delete(2, "run-0").await.unwrap());

        assert!(store.locks.lock().unwrap().is_empty());
    }
}
