//! Wire protocol for the agent connection.
//!
//! Frames are JSON text messages tagged by `"type"` with snake_case fields,
//! matching the backend's WebSocket endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::panel::{ItemKind, PanelId};

/// Client type announced in the handshake.
pub const CLIENT_TYPE: &str = "pwa";

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Binds the connection to the client-chosen session id.
    Handshake {
        session_id: String,
        client_type: String,
        client_version: String,
    },
    /// Chat input for one panel's session.
    SendMessage {
        session_id: String,
        content: String,
        /// Item context (panel kind and id) for the agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    Keepalive {},
    /// Answer to a server-initiated `tool_request`.
    ToolResponse {
        request_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OutboundMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Handshake { .. } => "handshake",
            OutboundMessage::SendMessage { .. } => "send_message",
            OutboundMessage::Keepalive {} => "keepalive",
            OutboundMessage::ToolResponse { .. } => "tool_response",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn default_true() -> bool {
    true
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

/// Messages pushed from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    HandshakeAck {
        session_id: String,
        connection_id: String,
        #[serde(default)]
        is_reconnect: bool,
        #[serde(default)]
        session_info: Option<Value>,
    },
    KeepaliveAck {},
    /// Agent output; without a session id it belongs to the focused panel.
    AgentResponse {
        #[serde(default)]
        session_id: Option<String>,
        content: String,
        #[serde(default = "default_true")]
        is_final: bool,
    },
    ItemUpdated {
        item_id: String,
        item_type: ItemKind,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    ItemCreated {
        item_id: String,
        item_type: ItemKind,
        #[serde(default)]
        data: Value,
    },
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    TypingIndicator {
        #[serde(default)]
        session_id: Option<String>,
        is_typing: bool,
    },
    ToolReport {
        #[serde(default)]
        session_id: Option<String>,
        tool_name: String,
        #[serde(default)]
        tool_call_id: Option<String>,
    },
    ToolResult {
        #[serde(default)]
        session_id: Option<String>,
        tool_name: String,
        #[serde(default)]
        content: Value,
    },
    ToolRequest {
        request_id: String,
        tool_name: String,
        #[serde(default)]
        parameters: Value,
        #[serde(default = "default_tool_timeout_ms")]
        timeout_ms: u64,
    },
    ClipUpdated {
        clip_id: String,
        new_code: String,
        #[serde(default)]
        metadata: Option<Map<String, Value>>,
    },
    SongUpdated {
        song_id: String,
        clip_ids: Vec<String>,
        #[serde(default)]
        metadata: Option<Map<String, Value>>,
    },
    PlaylistUpdated {
        playlist_id: String,
        song_ids: Vec<String>,
        #[serde(default)]
        metadata: Option<Map<String, Value>>,
    },
}

impl InboundMessage {
    /// Parses one text frame.
    ///
    /// Any parse failure is reported as a protocol error; the caller decides
    /// whether to drop the frame.
    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| SyncError::protocol(e.to_string()))
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::HandshakeAck { .. } => "handshake_ack",
            InboundMessage::KeepaliveAck {} => "keepalive_ack",
            InboundMessage::AgentResponse { .. } => "agent_response",
            InboundMessage::ItemUpdated { .. } => "item_updated",
            InboundMessage::ItemCreated { .. } => "item_created",
            InboundMessage::Error { .. } => "error",
            InboundMessage::TypingIndicator { .. } => "typing_indicator",
            InboundMessage::ToolReport { .. } => "tool_report",
            InboundMessage::ToolResult { .. } => "tool_result",
            InboundMessage::ToolRequest { .. } => "tool_request",
            InboundMessage::ClipUpdated { .. } => "clip_updated",
            InboundMessage::SongUpdated { .. } => "song_updated",
            InboundMessage::PlaylistUpdated { .. } => "playlist_updated",
        }
    }

    /// Rewrites the legacy per-kind update events as a generic `item_updated`.
    ///
    /// Other messages are returned unchanged.
    pub fn normalize(self) -> Self {
        match self {
            InboundMessage::ClipUpdated {
                clip_id,
                new_code,
                metadata,
            } => {
                let mut fields = Map::new();
                fields.insert("code".to_string(), Value::String(new_code));
                insert_metadata(&mut fields, metadata);
                InboundMessage::ItemUpdated {
                    item_id: clip_id,
                    item_type: ItemKind::Clip,
                    fields,
                }
            }
            InboundMessage::SongUpdated {
                song_id,
                clip_ids,
                metadata,
            } => {
                let mut fields = Map::new();
                fields.insert("clip_ids".to_string(), string_list(clip_ids));
                insert_metadata(&mut fields, metadata);
                InboundMessage::ItemUpdated {
                    item_id: song_id,
                    item_type: ItemKind::Song,
                    fields,
                }
            }
            InboundMessage::PlaylistUpdated {
                playlist_id,
                song_ids,
                metadata,
            } => {
                let mut fields = Map::new();
                fields.insert("song_ids".to_string(), string_list(song_ids));
                insert_metadata(&mut fields, metadata);
                InboundMessage::ItemUpdated {
                    item_id: playlist_id,
                    item_type: ItemKind::Playlist,
                    fields,
                }
            }
            other => other,
        }
    }

    /// The panel this message targets, if it targets one.
    pub fn target_panel(&self) -> Option<PanelId> {
        match self {
            InboundMessage::ItemUpdated {
                item_id, item_type, ..
            }
            | InboundMessage::ItemCreated {
                item_id, item_type, ..
            } => Some(PanelId::new(*item_type, item_id.clone())),
            InboundMessage::ClipUpdated { clip_id, .. } => {
                Some(PanelId::new(ItemKind::Clip, clip_id.clone()))
            }
            InboundMessage::SongUpdated { song_id, .. } => {
                Some(PanelId::new(ItemKind::Song, song_id.clone()))
            }
            InboundMessage::PlaylistUpdated { playlist_id, .. } => {
                Some(PanelId::new(ItemKind::Playlist, playlist_id.clone()))
            }
            _ => None,
        }
    }
}

fn string_list(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

// An empty metadata object from the legacy events means "not mentioned".
fn insert_metadata(fields: &mut Map<String, Value>, metadata: Option<Map<String, Value>>) {
    if let Some(metadata) = metadata
        && !metadata.is_empty()
    {
        fields.insert("metadata".to_string(), Value::Object(metadata));
    }
}

/// Result the UI hands back for a server `tool_request`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

impl ToolOutcome {
    pub fn into_response(self, request_id: String) -> OutboundMessage {
        match self {
            ToolOutcome::Success(data) => OutboundMessage::ToolResponse {
                request_id,
                success: true,
                data: Some(data),
                error: None,
            },
            ToolOutcome::Failure(error) => OutboundMessage::ToolResponse {
                request_id,
                success: false,
                data: None,
                error: Some(error),
            },
        }
    }
}
