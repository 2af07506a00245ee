//! Path management for the sync engine's local files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/strudel-sync/      # Config directory (platform default via `dirs`)
//! ├── config.toml              # SyncConfig
//! └── recent_items.toml        # Recently closed panels
//! ```

use std::path::{Path, PathBuf};
use strudel_core::{Result, SyncError};

const APP_DIR_NAME: &str = "strudel-sync";

/// Resolved locations of every file the engine persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrudelPaths {
    config_dir: PathBuf,
}

impl StrudelPaths {
    /// Resolves the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` when no home/config directory can be
    /// determined for the current user.
    pub fn resolve() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| SyncError::config("Cannot find the user config directory"))?;
        Ok(Self::at(base.join(APP_DIR_NAME)))
    }

    /// Uses an explicit directory instead of the platform default.
    pub fn at(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn recent_items_file(&self) -> PathBuf {
        self.config_dir.join("recent_items.toml")
    }
}
