//! MongoDB Integration Tests
//!
//! Needs a server at `MONGO_URI` (default `mongodb://localhost:27017`); each
//! test returns early when none is reachable.

#![cfg(feature = "mongodb-backend")]

use baseline_rs::store::{MongoModelStore, MongoStoreConfig};
use baseline_rs::{ModelStore, StatisticalModel};
use std::time::Duration;

async fn connect() -> Option<MongoModelStore> {
    let config = MongoStoreConfig {
        uri: std::env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into()),
        database: "baseline_rs_test".to_string(),
        collection: format!("models_{}", uuid::Uuid::new_v4().simple()),
        app_name: None,
    };

    match MongoModelStore::connect(&config, Duration::from_secs(2)).await {
        Ok(store) => Some(store),
        Err(e) => {
            // Connection might fail if MongoDB is not running
            println!("MongoDB unavailable (expected if server not running): {}", e);
            None
        }
    }
}

fn model(offset: f64) -> StatisticalModel {
    StatisticalModel::fit(&[vec![offset, 1.0], vec![offset + 2.0, 3.0]]).unwrap()
}

#[tokio::test]
async fn test_save_load_delete() {
    let Some(store) = connect().await else {
        return;
    };

    store.save(1, "r1", &model(0.0)).await.unwrap();
    assert_eq!(store.load(1, "r1").await.unwrap(), Some(model(0.0)));
    assert!(store.load(2, "r1").await.unwrap().is_none());

    // upsert by a second user shares the run
    store.save(2, "r1", &model(10.0)).await.unwrap();
    assert_eq!(store.load(1, "r1").await.unwrap(), Some(model(10.0)));
    assert_eq!(store.load(2, "r1").await.unwrap(), Some(model(10.0)));

    assert!(!store.delete(3, "r1").await.unwrap());
    assert!(store.delete(1, "r1").await.unwrap());
    assert!(!store.delete(1, "r1").await.unwrap());
    assert!(store.load(2, "r1").await.unwrap().is_none());

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_create_and_conditional_replace() {
    let Some(store) = connect().await else {
        return;
    };

    assert!(store.create(1, "gen", &model(0.0)).await.unwrap());
    assert!(!store.create(2, "gen", &model(5.0)).await.unwrap());

    let read = store.load_versioned(1, "gen").await.unwrap().unwrap();
    store.save(1, "gen", &model(7.0)).await.unwrap();
    assert!(!store
        .replace(1, "gen", &read.revision, &model(9.0))
        .await
        .unwrap());

    let fresh = store.load_versioned(1, "gen").await.unwrap().unwrap();
    assert!(store
        .replace(1, "gen", &fresh.revision, &model(9.0))
        .await
        .unwrap());
    assert_eq!(store.load(1, "gen").await.unwrap(), Some(model(9.0)));

    store.close().await.unwrap();
}
