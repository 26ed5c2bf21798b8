//! Wiring of the store, the HTTP browser and the batch controller

use std::sync::Arc;

use anyhow::{Context, Result};
use trawl_runner::{BatchController, ExtractionBridge, HiddenTabManager};
use trawl_store::{JobStore, SqliteRecordStore, db};

use crate::config::Config;
use crate::driver::HttpBrowser;

pub struct Session {
    pub store: Arc<JobStore>,
    pub controller: BatchController,
}

impl Session {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::create_pool(&config.runner.database_url)
            .await
            .with_context(|| format!("Failed to open {}", config.runner.database_url))?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;

        let store = Arc::new(JobStore::new(Arc::new(SqliteRecordStore::new(pool))));

        let (browser, responses) = HttpBrowser::new().context("Failed to build HTTP client")?;
        let browser = Arc::new(browser);
        let tabs = Arc::new(HiddenTabManager::new(
            browser.clone(),
            config.runner.page_load_timeout,
        ));
        let bridge = Arc::new(ExtractionBridge::new(
            browser,
            responses,
            config.runner.extraction_timeout,
        ));

        let controller = BatchController::new(Arc::clone(&store), tabs, bridge, config.runner.clone());

        Ok(Self { store, controller })
    }
}
