//! Recent-item domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::panel::{ItemKind, Panel, PanelId};

/// A closed panel remembered for quick reopening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentItem {
    pub id: PanelId,
    pub kind: ItemKind,
    pub title: String,
    pub closed_at: DateTime<Utc>,
    /// Scalar metadata carried over from the panel, stringified.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RecentItem {
    /// Snapshots a panel at the moment it is closed.
    pub fn from_panel(panel: &Panel) -> Self {
        let metadata = panel
            .payload
            .metadata()
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((key.clone(), text))
            })
            .collect();

        Self {
            id: panel.id.clone(),
            kind: panel.kind(),
            title: panel.title().to_string(),
            closed_at: Utc::now(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{ClipPayload, PanelPayload};
    use serde_json::json;

    #[test]
    fn test_from_panel_keeps_scalar_metadata_only() {
        let mut clip = ClipPayload {
            name: "Kick".to_string(),
            ..Default::default()
        };
        clip.metadata.insert("bpm".to_string(), json!(120));
        clip.metadata.insert("author".to_string(), json!("ana"));
        clip.metadata.insert("tags".to_string(), json!(["drums"]));
        let panel = Panel::new("kick", PanelPayload::Clip(clip));

        let item = RecentItem::from_panel(&panel);

        assert_eq!(item.id.to_string(), "clip:kick");
        assert_eq!(item.title, "Kick");
        assert_eq!(item.metadata.get("bpm").map(String::as_str), Some("120"));
        assert_eq!(item.metadata.get("author").map(String::as_str), Some("ana"));
        assert!(!item.metadata.contains_key("tags"));
    }
}
