//! Session domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::panel::PanelId;

/// Lifecycle status of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but nothing sent yet.
    #[default]
    Idle,
    /// Waiting for the connection to become ready.
    Connecting,
    /// Bound to a live connection.
    Active,
    /// The last round trip or the connection failed; see `Session::error`.
    Error,
    /// The owning panel was closed.
    Closed,
}

/// One conversation addressed to exactly one panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub panel_id: PanelId,
    pub status: SessionStatus,
    /// Server connection id this session was last bound to.
    pub connection_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub error: Option<String>,
    /// Whether the agent is currently composing a reply.
    #[serde(default)]
    pub agent_typing: bool,
}

impl Session {
    /// Synthesizes a fresh idle session for the given panel.
    pub fn new(panel_id: PanelId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            panel_id,
            status: SessionStatus::Idle,
            connection_id: None,
            created_at: now,
            last_active_at: now,
            error: None,
            agent_typing: false,
        }
    }
}
