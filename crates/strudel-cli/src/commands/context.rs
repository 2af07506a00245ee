use anyhow::{Context as _, Result};
use std::sync::Arc;
use strudel_application::RecentItemsLedger;
use strudel_core::config::SyncConfig;
use strudel_infrastructure::{ConfigService, StrudelPaths, TomlRecentItemRepository};

/// Configuration and stores shared by every command.
pub struct CliContext {
    pub paths: StrudelPaths,
    pub config: SyncConfig,
}

impl CliContext {
    pub fn load() -> Result<Self> {
        let paths = StrudelPaths::resolve().context("Failed to locate the config directory")?;
        let config = ConfigService::new(&paths)
            .load()
            .with_context(|| format!("Failed to load {}", paths.config_file().display()))?;
        tracing::debug!("[CLI] Loaded config from {}", paths.config_file().display());
        Ok(Self { paths, config })
    }

    pub fn recent_ledger(&self) -> RecentItemsLedger {
        RecentItemsLedger::with_repository(
            self.config.recent_items_capacity,
            Arc::new(TomlRecentItemRepository::new(&self.paths)),
        )
    }
}
