pub mod cleanup;
pub mod config;
pub mod preview;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use vaultsync_core::AppConfig;
use vaultsync_render::{ConvertOptions, MarkdownConverter};
use vaultsync_sync::{ChangeCache, SyncOptions, SyncOrchestrator};

use crate::logging;
use crate::notion::NotionClient;
use crate::GlobalArgs;

pub type Orchestrator = SyncOrchestrator<NotionClient, MarkdownConverter>;

/// Loaded configuration plus the home directory it was resolved against.
pub struct Session {
    pub home: PathBuf,
    pub config: AppConfig,
}

impl Session {
    /// Resolve and validate the config, then install logging from it.
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = AppConfig::resolve(global.config.as_deref())
            .context("failed to load configuration (run `vaultsync config --create` first)")?;

        let log_file = global.log_file.clone().or_else(|| config.logging.file.clone());
        logging::init_tracing(&config.logging.level, global.verbose, log_file.as_deref())?;
        tracing::debug!(vault = %config.destination.sync_path().display(), "configuration loaded");
        Ok(Self { home, config })
    }

    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let client = NotionClient::from_config(&self.config.source);
        let converter = MarkdownConverter::new(ConvertOptions::from_config(&self.config.sync))
            .context("invalid conversion settings")?;
        let cache = ChangeCache::load(self.config.cache_path_at(&self.home));
        Ok(SyncOrchestrator::new(
            Arc::new(client),
            Arc::new(converter),
            cache,
            SyncOptions::from_config(&self.config),
        ))
    }
}
