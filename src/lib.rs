pub mod db;
pub mod error;
pub mod generation;
pub mod models;
pub mod service;
pub mod settings;
pub mod store;
pub mod timeline;
mod utils;

use std::sync::Arc;

use anyhow::Result;

pub use db::Database;
pub use error::{TimelineError, TimelineResult};
pub use generation::{GenerationReport, JobTracker, TimelineGenerator};
pub use service::{ServiceConfig, TimelineService};
pub use settings::SettingsStore;
pub use store::TimelineStore;

pub async fn run() -> Result<()> {
    let config = ServiceConfig::from_env()?;

    // Initialize logging (reads RUST_LOG env var)
    let level = if config.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("Timeline engine starting up...");

    let database = Database::new(config.db_path.clone())?;
    let settings = Arc::new(SettingsStore::new(config.settings_path.clone())?);
    let store: Arc<dyn TimelineStore> = Arc::new(database);

    let service = TimelineService::new(store, settings, &config);
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown requested");

    service.shutdown().await
}
