//! MongoDB model storage
//!
//! One document per run:
//! `{ run_id, access: [token, ..], revision, model_data: { means, stds, cov, data_points } }`.
//! `model_data` keeps the field name used by existing collections. A unique
//! index on `run_id` turns racing upserts into a retryable duplicate-key error
//! instead of duplicate documents.

use super::config::MongoStoreConfig;
use super::{ModelStore, Revision, StorageBackend, UserToken, VersionedModel};
use crate::analytics::StatisticalModel;
use crate::error::StoreError;
use async_trait::async_trait;
use mongodb::{
    bson::{doc, Bson},
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions},
    Client, Collection, IndexModel,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MongoRecord {
    run_id: String,
    access: Vec<UserToken>,
    #[serde(default)]
    revision: i64,
    model_data: StatisticalModel,
}

/// MongoDB-backed model store
#[derive(Debug, Clone)]
pub struct MongoModelStore {
    client: Client,
    records: Collection<MongoRecord>,
}

impl MongoModelStore {
    /// Connect, verify the server with a ping and ensure the `run_id` index
    pub async fn connect(config: &MongoStoreConfig, timeout: Duration) -> Result<Self, StoreError> {
        config.validate()?;

        let mut client_options = ClientOptions::parse(&config.uri)
            .await
            .map_err(convert_mongodb_error)?;
        client_options.connect_timeout = Some(timeout);
        client_options.server_selection_timeout = Some(timeout);
        if let Some(ref app_name) = config.app_name {
            client_options.app_name = Some(app_name.clone());
        }

        let client = Client::with_options(client_options).map_err(convert_mongodb_error)?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(convert_mongodb_error)?;

        let records = client
            .database(&config.database)
            .collection::<MongoRecord>(&config.collection);

        let index = IndexModel::builder()
            .keys(doc! { "run_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        records
            .create_index(index)
            .await
            .map_err(convert_mongodb_error)?;

        info!(
            "Connected to MongoDB collection {}.{}",
            config.database, config.collection
        );
        Ok(Self { client, records })
    }
}

#[async_trait]
impl ModelStore for MongoModelStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::MongoDb
    }

    async fn save(
        &self,
        user_token: UserToken,
        run_id: &str,
        model: &StatisticalModel,
    ) -> Result<(), StoreError> {
        let model_data = model_bson(model)?;

        // a losing concurrent upsert hits the unique index; the retry updates instead
        for attempt in 1..=2 {
            let result = self
                .records
                .update_one(
                    doc! { "run_id": run_id },
                    doc! {
                        "$set": { "model_data": model_data.clone() },
                        "$addToSet": { "access": user_token },
                        "$inc": { "revision": 1_i64 },
                    },
                )
                .upsert(true)
                .await;

            match result {
                Ok(_) => return Ok(()),
                Err(e) if is_duplicate_key(&e) && attempt == 1 => {
                    warn!("Upsert race on run {}, retrying as update", run_id);
                }
                Err(e) => return Err(convert_mongodb_error(e)),
            }
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
        let record = MongoRecord {
            run_id: run_id.to_string(),
            access: vec![user_token],
            revision: 1,
            model_data: model.clone(),
        };

        match self.records.insert_one(record).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(convert_mongodb_error(e)),
        }
    }

    async fn load_versioned(
        &self,
        user_token: UserToken,
        run_id: &str,
    ) -> Result<Option<VersionedModel>, StoreError> {
        let record = self
            .records
            .find_one(doc! { "run_id": run_id, "access": user_token })
            .await
            .map_err(convert_mongodb_error)?;

        Ok(record.map(|r| VersionedModel {
            revision: Revision::from(r.revision.max(0) as u64),
            model: r.model_data,
        }))
    }

    async fn replace(
        &self,
        user_token: UserToken,
        run_id: &str,
        expected: &Revision,
        model: &StatisticalModel,
    ) -> Result<bool, StoreError> {
        let Ok(expected) = expected.as_str().parse::<i64>() else {
            return Ok(false);
        };
        // documents written before revisions existed have no field at all
        let revision_filter = if expected == 0 {
            Bson::Document(doc! { "$in": [0_i64, Bson::Null] })
        } else {
            Bson::Int64(expected)
        };

        let result = self
            .records
            .update_one(
                doc! { "run_id": run_id, "access": user_token, "revision": revision_filter },
                doc! {
                    "$set": { "model_data": model_bson(model)? },
                    "$inc": { "revision": 1_i64 },
                },
            )
            .await
            .map_err(convert_mongodb_error)?;

        Ok(result.matched_count == 1)
    }

    async fn delete(&self, user_token: UserToken, run_id: &str) -> Result<bool, StoreError> {
        let result = self
            .records
            .delete_one(doc! { "run_id": run_id, "access": user_token })
            .await
            .map_err(convert_mongodb_error)?;

        debug!("Deleted {} document(s) for run {}", result.deleted_count, run_id);
        Ok(result.deleted_count > 0)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.client.clone().shutdown().await;
        info!("MongoDB client shut down");
        Ok(())
    }
}

fn model_bson(model: &StatisticalModel) -> Result<Bson, StoreError> {
    mongodb::bson::to_bson(model)
        .map_err(|e| StoreError::Backend(format!("Failed to encode model: {}", e)))
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

/// MongoDB specific error conversion
fn convert_mongodb_error(err: mongodb::error::Error) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::Authentication { .. } => {
            StoreError::Connection(format!("Authentication failed: {}", err))
        }
        ErrorKind::ServerSelection { .. } => {
            StoreError::Connection(format!("No reachable server: {}", err))
        }
        ErrorKind::ConnectionPoolCleared { .. } => {
            StoreError::Connection(format!("Connection pool cleared: {}", err))
        }
        ErrorKind::InvalidArgument { .. } => {
            StoreError::Configuration(format!("Invalid argument: {}", err))
        }
        _ => StoreError::Backend(err.to_string()),
    }
}
