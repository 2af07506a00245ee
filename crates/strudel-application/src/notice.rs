//! Notices the engine raises for the UI.

use serde_json::Value;
use strudel_core::connection::ConnectionState;
use strudel_core::panel::PanelId;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotice {
    /// A remote update overwrote local unsaved edits.
    EditSuperseded { panel_id: PanelId },
    /// The server created an item that is not open.
    ItemCreated { panel_id: PanelId },
    /// A panel was opened without a user action.
    PanelOpened { panel_id: PanelId },
    /// New agent output landed in a panel's history.
    AgentMessage { panel_id: PanelId, complete: bool },
    /// The server asks the client to run a tool.
    ToolRequested {
        request_id: String,
        tool_name: String,
        parameters: Value,
    },
    /// A tool request passed its deadline without an answer.
    ToolRequestExpired { request_id: String },
    /// The server reported an error.
    ServerError {
        message: String,
        code: Option<String>,
        panel_id: Option<PanelId>,
    },
    ConnectionChanged(ConnectionState),
    /// Panels re-fetched after a reconnect.
    Resynced { refreshed: usize },
}
