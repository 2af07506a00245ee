//! Panel domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncError};

/// The closed set of item kinds a panel can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Editable pattern code.
    Clip,
    /// Document linking an ordered set of clips.
    Song,
    /// Ordered list of songs.
    Playlist,
    /// Read-only reference document.
    Reference,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Clip => "clip",
            ItemKind::Song => "song",
            ItemKind::Playlist => "playlist",
            ItemKind::Reference => "reference",
        }
    }

    /// Whether local edits are allowed on panels of this kind.
    pub fn is_editable(&self) -> bool {
        !matches!(self, ItemKind::Reference)
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "clip" => Ok(ItemKind::Clip),
            "song" => Ok(ItemKind::Song),
            "playlist" => Ok(ItemKind::Playlist),
            "reference" => Ok(ItemKind::Reference),
            other => Err(SyncError::protocol(format!("unknown item kind '{}'", other))),
        }
    }
}

/// Stable panel identifier in `<kind>:<item id>` form, e.g. `clip:kick`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PanelId {
    kind: ItemKind,
    item_id: String,
}

impl PanelId {
    pub fn new(kind: ItemKind, item_id: impl Into<String>) -> Self {
        Self {
            kind,
            item_id: item_id.into(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// The server-side item identifier, without the kind prefix.
    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.item_id)
    }
}

impl FromStr for PanelId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, item_id) = s
            .split_once(':')
            .ok_or_else(|| SyncError::protocol(format!("panel id '{}' has no kind prefix", s)))?;
        if item_id.is_empty() {
            return Err(SyncError::protocol(format!("panel id '{}' has no item id", s)));
        }
        Ok(Self::new(kind.parse()?, item_id))
    }
}

impl TryFrom<String> for PanelId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PanelId> for String {
    fn from(id: PanelId) -> Self {
        id.to_string()
    }
}

/// Editable pattern payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClipPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Linked document payload: a song references clips by id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SongPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clip_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Ordered document list payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaylistPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub song_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Read-only reference payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferencePayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Variant-specific panel content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PanelPayload {
    Clip(ClipPayload),
    Song(SongPayload),
    Playlist(PlaylistPayload),
    Reference(ReferencePayload),
}

impl PanelPayload {
    pub fn kind(&self) -> ItemKind {
        match self {
            PanelPayload::Clip(_) => ItemKind::Clip,
            PanelPayload::Song(_) => ItemKind::Song,
            PanelPayload::Playlist(_) => ItemKind::Playlist,
            PanelPayload::Reference(_) => ItemKind::Reference,
        }
    }

    /// Builds a payload of the given kind from a loosely-typed JSON object.
    ///
    /// Missing fields take their defaults; unknown fields are ignored.
    pub fn from_value(kind: ItemKind, data: Value) -> Result<Self> {
        let payload = match kind {
            ItemKind::Clip => PanelPayload::Clip(serde_json::from_value(data)?),
            ItemKind::Song => PanelPayload::Song(serde_json::from_value(data)?),
            ItemKind::Playlist => PanelPayload::Playlist(serde_json::from_value(data)?),
            ItemKind::Reference => PanelPayload::Reference(serde_json::from_value(data)?),
        };
        Ok(payload)
    }

    /// Display title used by the carousel and the recent-items ledger.
    pub fn title(&self) -> &str {
        match self {
            PanelPayload::Clip(p) => &p.name,
            PanelPayload::Song(p) => &p.name,
            PanelPayload::Playlist(p) => &p.name,
            PanelPayload::Reference(p) => &p.title,
        }
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        match self {
            PanelPayload::Clip(p) => &p.metadata,
            PanelPayload::Song(p) => &p.metadata,
            PanelPayload::Playlist(p) => &p.metadata,
            PanelPayload::Reference(p) => &p.metadata,
        }
    }

    /// Overlays the given fields onto the payload.
    ///
    /// Only the keys present in `fields` change; everything else is kept. The
    /// payload is left untouched when the merged result does not fit the variant.
    pub fn merge_fields(&mut self, fields: &Map<String, Value>) -> Result<()> {
        match self {
            PanelPayload::Clip(p) => overlay(p, fields),
            PanelPayload::Song(p) => overlay(p, fields),
            PanelPayload::Playlist(p) => overlay(p, fields),
            PanelPayload::Reference(p) => overlay(p, fields),
        }
    }
}

fn overlay<T>(target: &mut T, fields: &Map<String, Value>) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let mut current = match serde_json::to_value(&*target)? {
        Value::Object(map) => map,
        _ => return Err(SyncError::internal("panel payload is not a JSON object")),
    };
    for (key, value) in fields {
        current.insert(key.clone(), value.clone());
    }
    *target = serde_json::from_value(Value::Object(current))
        .map_err(|e| SyncError::protocol(format!("field merge rejected: {}", e)))?;
    Ok(())
}

/// One open unit of work in the carousel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub id: PanelId,
    /// Local edits not yet acknowledged or overwritten remotely.
    pub dirty: bool,
    pub updated_at: DateTime<Utc>,
    pub payload: PanelPayload,
}

impl Panel {
    /// Creates a clean panel; the id's kind must match the payload's kind.
    pub fn new(item_id: impl Into<String>, payload: PanelPayload) -> Self {
        Self {
            id: PanelId::new(payload.kind(), item_id),
            dirty: false,
            updated_at: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.id.kind()
    }

    pub fn title(&self) -> &str {
        self.payload.title()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_panel_id_round_trips_through_string() {
        let id: PanelId = "clip:kick".parse().unwrap();
        assert_eq!(id.kind(), ItemKind::Clip);
        assert_eq!(id.item_id(), "kick");
        assert_eq!(id.to_string(), "clip:kick");

        // item ids may themselves contain colons
        let id: PanelId = "song:intro:v2".parse().unwrap();
        assert_eq!(id.item_id(), "intro:v2");
    }

    #[test]
    fn test_panel_id_rejects_malformed_input() {
        assert!("kick".parse::<PanelId>().is_err());
        assert!("clip:".parse::<PanelId>().is_err());
        assert!("track:kick".parse::<PanelId>().is_err());
    }

    #[test]
    fn test_merge_keeps_unmentioned_fields() {
        let mut payload = PanelPayload::Clip(ClipPayload {
            name: "Kick".to_string(),
            code: "s(\"bd\")".to_string(),
            metadata: Map::new(),
        });

        payload
            .merge_fields(&fields(json!({ "code": "s(\"bd*4\")" })))
            .unwrap();

        match payload {
            PanelPayload::Clip(clip) => {
                assert_eq!(clip.name, "Kick");
                assert_eq!(clip.code, "s(\"bd*4\")");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_merge_rejects_wrong_shape_without_mutation() {
        let original = PanelPayload::Song(SongPayload {
            name: "Intro".to_string(),
            clip_ids: vec!["kick".to_string()],
            metadata: Map::new(),
        });
        let mut payload = original.clone();

        let result = payload.merge_fields(&fields(json!({ "clip_ids": "not-a-list" })));

        assert!(result.unwrap_err().is_protocol());
        assert_eq!(payload, original);
    }

    #[test]
    fn test_from_value_fills_defaults() {
        let payload =
            PanelPayload::from_value(ItemKind::Playlist, json!({ "name": "Live set" })).unwrap();
        assert_eq!(payload.kind(), ItemKind::Playlist);
        assert_eq!(payload.title(), "Live set");
    }
}
