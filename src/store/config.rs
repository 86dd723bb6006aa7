//! Model Store Configuration
//!
//! Backend selection and per-backend connection settings

use crate::error::StoreError;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map (development and tests)
    Memory,
    /// One JSON file per run in a local directory
    #[default]
    File,
    /// S3-style HTTP object store with ETag conditional requests
    Object,
    /// MongoDB collection
    #[serde(rename = "mongodb")]
    MongoDb,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageBackend::Memory => "memory",
            StorageBackend::File => "file",
            StorageBackend::Object => "object",
            StorageBackend::MongoDb => "mongodb",
        };
        f.write_str(name)
    }
}

/// Model store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Upper bound for any single store call
    pub timeout_seconds: u64,
    /// Optimistic-concurrency attempts before reporting a conflict
    pub max_update_retries: u32,
    pub file: FileStoreConfig,
    pub object: ObjectStoreConfig,
    pub mongodb: MongoStoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            timeout_seconds: 10,
            max_update_retries: 5,
            file: FileStoreConfig::default(),
            object: ObjectStoreConfig::default(),
            mongodb: MongoStoreConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validate the settings of the selected backend
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.timeout_seconds == 0 {
            return Err(StoreError::Configuration(
                "storage.timeout_seconds must be positive".to_string(),
            ));
        }
        if self.max_update_retries == 0 {
            return Err(StoreError::Configuration(
                "storage.max_update_retries must be positive".to_string(),
            ));
        }

        match self.backend {
            StorageBackend::Memory => Ok(()),
            StorageBackend::File => {
                if self.file.dir.as_os_str().is_empty() {
                    return Err(StoreError::Configuration(
                        "storage.file.dir cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }
            StorageBackend::Object => self.object.validate(),
            StorageBackend::MongoDb => self.mongodb.validate(),
        }
    }
}

/// Local directory store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    pub dir: PathBuf,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
        }
    }
}

/// HTTP object store (S3-compatible path-style addressing)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Base URL, e.g. `http://localhost:9000`
    pub endpoint: String,
    pub bucket: String,
    /// Key prefix inside the bucket
    pub prefix: String,
    /// Bearer token sent with every request
    #[serde(skip_serializing)]
    pub access_token: Option<SecretString>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "baselines".to_string(),
            prefix: "runs".to_string(),
            access_token: None,
        }
    }
}

impl ObjectStoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.endpoint.is_empty() {
            return Err(StoreError::Configuration(
                "storage.object.endpoint cannot be empty".to_string(),
            ));
        }
        if url::Url::parse(&self.endpoint).is_err() {
            return Err(StoreError::Configuration(format!(
                "storage.object.endpoint is not a URL: {}",
                self.endpoint
            )));
        }
        if self.bucket.is_empty() {
            return Err(StoreError::Configuration(
                "storage.object.bucket cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// MongoDB collection store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoStoreConfig {
    /// Connection URI
    pub uri: String,
    pub database: String,
    pub collection: String,
    /// Application name reported to the server
    pub app_name: Option<String>,
}

impl Default for MongoStoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "anomalydetection".to_string(),
            collection: "models".to_string(),
            app_name: Some("baseline-rs".to_string()),
        }
    }
}

impl MongoStoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.uri.is_empty() {
            return Err(StoreError::Configuration(
                "MongoDB URI cannot be empty".to_string(),
            ));
        }
        if self.database.is_empty() {
            return Err(StoreError::Configuration(
                "Database name cannot be empty".to_string(),
            ));
        }
        if self.collection.is_empty() {
            return Err(StoreError::Configuration(
                "Collection name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
