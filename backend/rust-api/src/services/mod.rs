use std::sync::Arc;

use mongodb::bson::doc;
use mongodb::{Client as MongoClient, Database};

use crate::config::Config;
use crate::services::catalog::CatalogCache;
use crate::services::hint_engine::HintEngine;
use crate::services::store::{HintStore, MongoHintStore};

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub store: Arc<dyn HintStore>,
    pub engine: HintEngine,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Testing MongoDB connection with ping...");
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            mongo.run_command(doc! { "ping": 1 }),
        )
        .await
        .map_err(|_| anyhow::anyhow!("MongoDB ping timeout after 5s"))??;
        tracing::info!("MongoDB connection established successfully");

        let store: Arc<dyn HintStore> = Arc::new(MongoHintStore::new(mongo.clone()));
        let engine = HintEngine::new(store.clone(), CatalogCache::new(&config.catalog_dir));

        Ok(Self {
            config,
            mongo,
            store,
            engine,
        })
    }
}

pub mod analyzer;
pub mod catalog;
pub mod hint_engine;
pub mod progression;
pub mod selector;
pub mod store;
