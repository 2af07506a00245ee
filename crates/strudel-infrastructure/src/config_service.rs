//! Loading and saving `SyncConfig`.
//!
//! The file is optional; missing keys fall back to defaults and a handful of
//! environment variables override what the file says.

use strudel_core::config::SyncConfig;
use strudel_core::{Result, SyncError};

use crate::paths::StrudelPaths;
use crate::storage::AtomicTomlFile;

pub const ENV_SERVER_URL: &str = "STRUDEL_SERVER_URL";
pub const ENV_API_URL: &str = "STRUDEL_API_URL";
pub const ENV_PROJECT_ID: &str = "STRUDEL_PROJECT_ID";

/// Reads and writes `config.toml`.
pub struct ConfigService {
    file: AtomicTomlFile<SyncConfig>,
}

impl ConfigService {
    pub fn new(paths: &StrudelPaths) -> Self {
        Self {
            file: AtomicTomlFile::new(paths.config_file()),
        }
    }

    /// Loads the stored config and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting config is invalid.
    pub fn load(&self) -> Result<SyncConfig> {
        let stored = self.load_stored()?;
        let config = apply_overrides(stored, |key| std::env::var(key).ok());
        validate(&config)?;
        Ok(config)
    }

    /// Loads the stored config without environment overrides.
    pub fn load_stored(&self) -> Result<SyncConfig> {
        match self.file.load()? {
            Some(config) => {
                tracing::debug!("[ConfigService] Loaded {}", self.file.path().display());
                Ok(config)
            }
            None => {
                tracing::debug!(
                    "[ConfigService] No config at {}, using defaults",
                    self.file.path().display()
                );
                Ok(SyncConfig::default())
            }
        }
    }

    pub fn save(&self, config: &SyncConfig) -> Result<()> {
        validate(config)?;
        self.file.save(config)?;
        tracing::info!("[ConfigService] Saved {}", self.file.path().display());
        Ok(())
    }
}

/// Applies environment overrides using `lookup` to read variables.
pub fn apply_overrides<F>(mut config: SyncConfig, lookup: F) -> SyncConfig
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(url) = non_empty(ENV_SERVER_URL) {
        config.server_url = url;
    }
    if let Some(url) = non_empty(ENV_API_URL) {
        config.api_base_url = url;
    }
    if let Some(project_id) = non_empty(ENV_PROJECT_ID) {
        config.project_id = project_id;
    }
    config
}

fn validate(config: &SyncConfig) -> Result<()> {
    if !(config.server_url.starts_with("ws://") || config.server_url.starts_with("wss://")) {
        return Err(SyncError::config(format!(
            "server_url must be a ws:// or wss:// URL, got '{}'",
            config.server_url
        )));
    }
    if config.history_page_size == 0 {
        return Err(SyncError::config("history_page_size must be at least 1"));
    }
    if config.recent_items_capacity == 0 {
        return Err(SyncError::config("recent_items_capacity must be at least 1"));
    }
    Ok(())
}
