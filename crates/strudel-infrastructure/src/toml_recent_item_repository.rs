//! TOML-backed recent-items repository.

use serde::{Deserialize, Serialize};
use strudel_core::Result;
use strudel_core::recent::{RecentItem, RecentItemRepository};

use crate::paths::StrudelPaths;
use crate::storage::AtomicTomlFile;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecentItemsDocument {
    #[serde(default)]
    items: Vec<RecentItem>,
}

/// Stores the recent-items ledger in `recent_items.toml`.
pub struct TomlRecentItemRepository {
    file: AtomicTomlFile<RecentItemsDocument>,
}

impl TomlRecentItemRepository {
    pub fn new(paths: &StrudelPaths) -> Self {
        Self {
            file: AtomicTomlFile::new(paths.recent_items_file()),
        }
    }
}

impl RecentItemRepository for TomlRecentItemRepository {
    fn load(&self) -> Result<Vec<RecentItem>> {
        let items = self.file.load()?.unwrap_or_default().items;
        tracing::debug!("[RecentItemRepository] Loaded {} recent items", items.len());
        Ok(items)
    }

    fn save(&self, items: &[RecentItem]) -> Result<()> {
        let document = RecentItemsDocument {
            items: items.to_vec(),
        };
        self.file.save(&document)?;
        tracing::debug!("[RecentItemRepository] Saved {} recent items", items.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use strudel_core::panel::{ItemKind, PanelId};
    use tempfile::TempDir;

    fn item(kind: ItemKind, id: &str, title: &str) -> RecentItem {
        let mut metadata = BTreeMap::new();
        metadata.insert("bpm".to_string(), "120".to_string());
        RecentItem {
            id: PanelId::new(kind, id),
            kind,
            title: title.to_string(),
            closed_at: Utc::now(),
            metadata,
        }
    }

    #[test]
    fn test_load_without_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let repo = TomlRecentItemRepository::new(&StrudelPaths::at(temp_dir.path()));

        assert!(repo.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let repo = TomlRecentItemRepository::new(&StrudelPaths::at(temp_dir.path()));

        let items = vec![
            item(ItemKind::Song, "intro", "Intro"),
            item(ItemKind::Clip, "kick", "Kick"),
        ];
        repo.save(&items).unwrap();

        let loaded = repo.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id.to_string(), "song:intro");
        assert_eq!(loaded[1].id.to_string(), "clip:kick");
        assert_eq!(loaded[1].metadata.get("bpm").map(String::as_str), Some("120"));
    }
}
