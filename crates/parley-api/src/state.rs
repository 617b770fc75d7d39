//! Application state shared by the CLI commands.
//!
//! Resolves the data directory and configuration once; stores and services are
//! built per command because `run` picks its backend at runtime.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use parley_core::history::HistoryCache;
use parley_core::storage::KvStore;
use parley_infra::config::{load_global_config, resolve_data_dir};
use parley_infra::sqlite::{DatabasePool, SqliteKvStore, default_database_url};
use parley_types::config::GlobalConfig;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: GlobalConfig,
}

impl AppState {
    /// Resolve the data directory (creating it) and load `config.toml`.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_global_config(&data_dir).await;

        Ok(Self { data_dir, config })
    }

    pub fn database_url(&self) -> String {
        self.config
            .store
            .database_url
            .clone()
            .unwrap_or_else(|| default_database_url(&self.data_dir))
    }

    /// Open (and migrate) the shared SQLite store.
    pub async fn open_sqlite(&self) -> anyhow::Result<Arc<SqliteKvStore>> {
        let url = self.database_url();
        let pool = DatabasePool::new(&url)
            .await
            .with_context(|| format!("failed to open database {url}"))?;
        Ok(Arc::new(SqliteKvStore::new(pool)))
    }

    pub fn history_cache<S: KvStore>(&self, store: Arc<S>) -> HistoryCache<S> {
        HistoryCache::new(store, self.config.history.namespace.clone())
    }
}
