//! Wiring: config to stores, registry and a refreshed engine.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use cloudsearch_core::{AccountStore, ContentType, ResultStore};

use crate::cached::CachedSearchBuilder;
use crate::config::Config;
use crate::connector_fs;
use crate::db;
use crate::engine::SearchEngine;
use crate::migrate;
use crate::registry::Registry;
use crate::sqlite_store::{SqliteAccountStore, SqliteResultStore};

pub struct App {
    pub config: Config,
    pub engine: Arc<SearchEngine>,
    pool: SqlitePool,
}

impl App {
    /// Open the database, run migrations and load the live source set.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;

        let accounts: Arc<dyn AccountStore> = Arc::new(SqliteAccountStore::new(pool.clone()));
        let results: Arc<dyn ResultStore> = Arc::new(SqliteResultStore::new(pool.clone()));
        let registry = build_registry(&config, Arc::clone(&results));

        let engine = SearchEngine::new(
            accounts,
            results,
            Arc::new(registry),
            config.engine_settings(),
        );
        engine.refresh().await?;

        Ok(Self {
            config,
            engine: Arc::new(engine),
            pool,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Every account type this build knows how to search.
pub fn build_registry(config: &Config, results: Arc<dyn ResultStore>) -> Registry {
    let mut registry = Registry::new();
    registry.register_account_type(
        connector_fs::local_account_type(),
        CachedSearchBuilder::new(
            connector_fs::search_builder(config.local.clone()),
            results,
            config.search.cache_results,
        ),
        connector_fs::auth_builder(),
    );
    registry.register_content_types(ContentType::FILE_TYPES);
    registry
}
