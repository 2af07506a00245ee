//! Routes inbound server events to panels, sessions, and histories.
//!
//! Events address their target by id. A target that is no longer open is a
//! normal race with a close, so the event is dropped with a debug log.

use serde_json::Value;
use std::time::{Duration, Instant};
use strudel_core::panel::{Panel, PanelId, PanelPayload};
use strudel_core::protocol::InboundMessage;
use strudel_core::session::{Message, SessionStatus};

use crate::history_store::HistoryStore;
use crate::notice::EngineNotice;
use crate::panel_registry::PanelRegistry;
use crate::session_registry::SessionRegistry;
use crate::tool_requests::PendingToolRequests;

/// The stores an inbound event may touch.
pub struct DispatchTargets<'a> {
    pub panels: &'a mut PanelRegistry,
    pub sessions: &'a mut SessionRegistry,
    pub history: &'a mut HistoryStore,
    pub tools: &'a mut PendingToolRequests,
}

#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    auto_load_created: bool,
}

impl Dispatcher {
    /// # Arguments
    ///
    /// * `auto_load_created` - Open a panel for items the server reports as
    ///   created instead of only raising a notice
    pub fn new(auto_load_created: bool) -> Self {
        Self { auto_load_created }
    }

    /// Applies one inbound event.
    ///
    /// # Returns
    ///
    /// Notices for the UI, possibly empty.
    pub fn dispatch(
        &self,
        message: InboundMessage,
        targets: &mut DispatchTargets<'_>,
        now: Instant,
    ) -> Vec<EngineNotice> {
        match message.normalize() {
            InboundMessage::ItemUpdated {
                item_id,
                item_type,
                fields,
            } => apply_remote_fields(targets.panels, &PanelId::new(item_type, item_id), &fields)
                .into_iter()
                .collect(),

            InboundMessage::ItemCreated {
                item_id,
                item_type,
                data,
            } => self.on_item_created(targets.panels, PanelId::new(item_type, item_id), data),

            InboundMessage::AgentResponse {
                session_id,
                content,
                is_final,
            } => {
                let Some((session_id, panel_id)) = resolve_session(targets, session_id.as_deref())
                else {
                    tracing::debug!("[Dispatcher] Dropping agent_response with no open session");
                    return Vec::new();
                };
                targets.history.append_agent_chunk(&session_id, &content, is_final);
                targets
                    .sessions
                    .update_status(&panel_id, SessionStatus::Active, None);
                if is_final {
                    targets.sessions.set_agent_typing(&panel_id, false);
                }
                vec![EngineNotice::AgentMessage {
                    panel_id,
                    complete: is_final,
                }]
            }

            InboundMessage::Error {
                message,
                code,
                session_id,
            } => {
                let panel_id = session_id
                    .as_deref()
                    .and_then(|id| targets.sessions.find_by_session_id(id))
                    .map(|session| session.panel_id.clone());
                if let Some(panel_id) = &panel_id {
                    targets.sessions.update_status(
                        panel_id,
                        SessionStatus::Error,
                        Some(message.clone()),
                    );
                    targets.sessions.set_agent_typing(panel_id, false);
                }
                tracing::warn!("[Dispatcher] Server error: {}", message);
                vec![EngineNotice::ServerError {
                    message,
                    code,
                    panel_id,
                }]
            }

            InboundMessage::TypingIndicator {
                session_id,
                is_typing,
            } => {
                if let Some((_, panel_id)) = resolve_session(targets, session_id.as_deref()) {
                    targets.sessions.set_agent_typing(&panel_id, is_typing);
                }
                Vec::new()
            }

            InboundMessage::ToolReport {
                session_id,
                tool_name,
                ..
            } => {
                record_system_message(
                    targets,
                    session_id.as_deref(),
                    format!("Running tool: {}", tool_name),
                );
                Vec::new()
            }

            InboundMessage::ToolResult {
                session_id,
                tool_name,
                content,
            } => {
                let text = match content {
                    Value::String(text) => text,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                let line = if text.is_empty() {
                    format!("Tool {} finished", tool_name)
                } else {
                    format!("Tool {} finished: {}", tool_name, text)
                };
                record_system_message(targets, session_id.as_deref(), line);
                Vec::new()
            }

            InboundMessage::ToolRequest {
                request_id,
                tool_name,
                parameters,
                timeout_ms,
            } => {
                targets.tools.register(
                    request_id.clone(),
                    tool_name.clone(),
                    parameters.clone(),
                    Duration::from_millis(timeout_ms),
                    now,
                );
                vec![EngineNotice::ToolRequested {
                    request_id,
                    tool_name,
                    parameters,
                }]
            }

            // connection-level traffic is handled by the connection driver
            other => {
                tracing::trace!("[Dispatcher] Nothing to route for {}", other.kind());
                Vec::new()
            }
        }
    }

    fn on_item_created(
        &self,
        panels: &mut PanelRegistry,
        panel_id: PanelId,
        data: Value,
    ) -> Vec<EngineNotice> {
        if panels.contains(&panel_id) {
            return match data {
                Value::Object(fields) => apply_remote_fields(panels, &panel_id, &fields)
                    .into_iter()
                    .collect(),
                _ => Vec::new(),
            };
        }

        if !self.auto_load_created {
            return vec![EngineNotice::ItemCreated { panel_id }];
        }

        match PanelPayload::from_value(panel_id.kind(), data) {
            Ok(payload) => {
                // keep the user's focus where it was
                let focused = panels.current().map(|panel| panel.id.clone());
                panels.load_panel(Panel::new(panel_id.item_id(), payload));
                if let Some(focused) = focused {
                    panels.focus(&focused);
                }
                tracing::debug!("[Dispatcher] Auto-loaded {}", panel_id);
                vec![EngineNotice::PanelOpened { panel_id }]
            }
            Err(e) => {
                tracing::warn!("[Dispatcher] Cannot load created item {}: {}", panel_id, e);
                vec![EngineNotice::ItemCreated { panel_id }]
            }
        }
    }
}

/// Merges a remote update; remote wins over the dirty flag.
fn apply_remote_fields(
    panels: &mut PanelRegistry,
    panel_id: &PanelId,
    fields: &serde_json::Map<String, Value>,
) -> Option<EngineNotice> {
    let Some(was_dirty) = panels.get(panel_id).map(|panel| panel.dirty) else {
        tracing::debug!("[Dispatcher] Dropping update for closed panel {}", panel_id);
        return None;
    };

    if let Err(e) = panels.update_panel(panel_id, fields) {
        tracing::warn!("[Dispatcher] Rejected update for {}: {}", panel_id, e);
        return None;
    }
    panels.set_dirty(panel_id, false);

    if was_dirty {
        tracing::info!("[Dispatcher] Remote update superseded local edits on {}", panel_id);
        Some(EngineNotice::EditSuperseded {
            panel_id: panel_id.clone(),
        })
    } else {
        None
    }
}

/// Finds the session an event is about; without an id, the focused panel's.
fn resolve_session(
    targets: &DispatchTargets<'_>,
    session_id: Option<&str>,
) -> Option<(String, PanelId)> {
    let session = match session_id {
        Some(id) => targets.sessions.find_by_session_id(id),
        None => targets
            .panels
            .current()
            .and_then(|panel| targets.sessions.get(&panel.id)),
    };
    match session {
        Some(session) => Some((session.id.clone(), session.panel_id.clone())),
        None => {
            tracing::debug!(
                "[Dispatcher] No open session for {}",
                session_id.unwrap_or("the focused panel")
            );
            None
        }
    }
}

fn record_system_message(targets: &mut DispatchTargets<'_>, session_id: Option<&str>, text: String) {
    if let Some((session_id, panel_id)) = resolve_session(targets, session_id) {
        targets.history.add_message(&session_id, Message::system(text));
        targets.sessions.touch(&panel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use strudel_core::panel::{ClipPayload, ItemKind};

    struct Fixture {
        panels: PanelRegistry,
        sessions: SessionRegistry,
        history: HistoryStore,
        tools: PendingToolRequests,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                panels: PanelRegistry::new(),
                sessions: SessionRegistry::new(),
                history: HistoryStore::new(),
                tools: PendingToolRequests::new(),
            }
        }

        fn dispatch(&mut self, dispatcher: &Dispatcher, frame: &str) -> Vec<EngineNotice> {
            let message = InboundMessage::decode(frame).unwrap();
            let mut targets = DispatchTargets {
                panels: &mut self.panels,
                sessions: &mut self.sessions,
                history: &mut self.history,
                tools: &mut self.tools,
            };
            dispatcher.dispatch(message, &mut targets, Instant::now())
        }

        fn open_clip(&mut self, item_id: &str) -> PanelId {
            let panel = Panel::new(
                item_id,
                PanelPayload::Clip(ClipPayload {
                    name: item_id.to_string(),
                    code: "s(\"bd\")".to_string(),
                    metadata: Map::new(),
                }),
            );
            let id = panel.id.clone();
            self.panels.load_panel(panel);
            id
        }

        fn clip_code(&self, id: &PanelId) -> String {
            match &self.panels.get(id).unwrap().payload {
                PanelPayload::Clip(clip) => clip.code.clone(),
                other => panic!("unexpected payload {:?}", other),
            }
        }
    }

    #[test]
    fn test_update_for_absent_panel_is_dropped() {
        let mut fixture = Fixture::new();
        let notices = fixture.dispatch(
            &Dispatcher::default(),
            r#"{"type":"item_updated","item_id":"kick","item_type":"clip","fields":{"code":"x"}}"#,
        );

        assert!(notices.is_empty());
        assert!(fixture.panels.is_empty());
    }

    #[test]
    fn test_remote_update_supersedes_dirty_edit() {
        let mut fixture = Fixture::new();
        let kick = fixture.open_clip("kick");
        fixture.panels.set_dirty(&kick, true);

        let notices = fixture.dispatch(
            &Dispatcher::default(),
            r#"{"type":"item_updated","item_id":"kick","item_type":"clip","fields":{"code":"s(\"bd*4\")"}}"#,
        );

        assert_eq!(notices, vec![EngineNotice::EditSuperseded { panel_id: kick.clone() }]);
        let panel = fixture.panels.get(&kick).unwrap();
        assert!(!panel.dirty);
        assert_eq!(panel.title(), "kick");
        assert_eq!(fixture.clip_code(&kick), "s(\"bd*4\")");
    }

    #[test]
    fn test_clean_update_raises_no_notice() {
        let mut fixture = Fixture::new();
        let kick = fixture.open_clip("kick");

        let notices = fixture.dispatch(
            &Dispatcher::default(),
            r#"{"type":"clip_updated","clip_id":"kick","new_code":"s(\"hh*8\")"}"#,
        );

        assert!(notices.is_empty());
        assert_eq!(fixture.clip_code(&kick), "s(\"hh*8\")");
    }

    #[test]
    fn test_item_created_notice_or_auto_load() {
        let frame = r#"{"type":"item_created","item_id":"snare","item_type":"clip","data":{"name":"Snare","code":"s(\"sd\")"}}"#;
        let snare = PanelId::new(ItemKind::Clip, "snare");

        let mut fixture = Fixture::new();
        let notices = fixture.dispatch(&Dispatcher::new(false), frame);
        assert_eq!(notices, vec![EngineNotice::ItemCreated { panel_id: snare.clone() }]);
        assert!(fixture.panels.is_empty());

        let mut fixture = Fixture::new();
        let kick = fixture.open_clip("kick");
        let notices = fixture.dispatch(&Dispatcher::new(true), frame);
        assert_eq!(notices, vec![EngineNotice::PanelOpened { panel_id: snare.clone() }]);
        assert_eq!(fixture.panels.get(&snare).unwrap().title(), "Snare");
        assert_eq!(fixture.panels.current().unwrap().id, kick);
    }

    #[test]
    fn test_agent_response_streams_into_history() {
        let mut fixture = Fixture::new();
        let kick = fixture.open_clip("kick");
        let session_id = fixture.sessions.get_or_create(&kick).id.clone();
        let dispatcher = Dispatcher::default();

        fixture.dispatch(
            &dispatcher,
            &json!({"type": "agent_response", "session_id": session_id, "content": "Try ", "is_final": false}).to_string(),
        );
        let notices = fixture.dispatch(
            &dispatcher,
            &json!({"type": "agent_response", "session_id": session_id, "content": "this"}).to_string(),
        );

        assert_eq!(notices, vec![EngineNotice::AgentMessage { panel_id: kick.clone(), complete: true }]);
        let history = fixture.history.get(&session_id).unwrap();
        assert_eq!(history.messages.len(), 1);
        assert_eq!(history.messages[0].content, "Try this");
        assert_eq!(fixture.sessions.get(&kick).unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn test_agent_response_without_session_goes_to_focused_panel() {
        let mut fixture = Fixture::new();
        let kick = fixture.open_clip("kick");
        let bass = fixture.open_clip("bass");
        let kick_session = fixture.sessions.get_or_create(&kick).id.clone();
        let bass_session = fixture.sessions.get_or_create(&bass).id.clone();

        let notices = fixture.dispatch(
            &Dispatcher::default(),
            r#"{"type":"agent_response","content":"Added a hi-hat","is_final":true}"#,
        );

        assert_eq!(notices, vec![EngineNotice::AgentMessage { panel_id: bass.clone(), complete: true }]);
        assert_eq!(fixture.history.get(&bass_session).unwrap().messages[0].content, "Added a hi-hat");
        assert!(fixture.history.get(&kick_session).is_none());
    }

    #[test]
    fn test_agent_response_without_any_session_is_dropped() {
        let mut fixture = Fixture::new();
        fixture.open_clip("kick");

        let notices = fixture.dispatch(
            &Dispatcher::default(),
            r#"{"type":"agent_response","content":"hello"}"#,
        );
        assert!(notices.is_empty());
    }

    #[test]
    fn test_agent_response_for_unknown_session_is_dropped() {
        let mut fixture = Fixture::new();
        let notices = fixture.dispatch(
            &Dispatcher::default(),
            r#"{"type":"agent_response","session_id":"gone","content":"late"}"#,
        );
        assert!(notices.is_empty());
        assert!(fixture.history.get("gone").is_none());
    }

    #[test]
    fn test_error_marks_session() {
        let mut fixture = Fixture::new();
        let kick = fixture.open_clip("kick");
        let session_id = fixture.sessions.get_or_create(&kick).id.clone();

        let notices = fixture.dispatch(
            &Dispatcher::default(),
            &json!({"type": "error", "message": "agent failed", "code": "agent_error", "session_id": session_id}).to_string(),
        );

        let session = fixture.sessions.get(&kick).unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error.as_deref(), Some("agent failed"));
        assert!(matches!(&notices[0], EngineNotice::ServerError { panel_id: Some(id), .. } if *id == kick));
    }

    #[test]
    fn test_tool_traffic_without_session_targets_focused_panel() {
        let mut fixture = Fixture::new();
        let kick = fixture.open_clip("kick");
        let session_id = fixture.sessions.get_or_create(&kick).id.clone();
        let dispatcher = Dispatcher::default();

        fixture.dispatch(&dispatcher, r#"{"type":"typing_indicator","is_typing":true}"#);
        assert!(fixture.sessions.get(&kick).unwrap().agent_typing);

        fixture.dispatch(&dispatcher, r#"{"type":"tool_report","tool_name":"update_clip"}"#);
        fixture.dispatch(
            &dispatcher,
            r#"{"type":"tool_result","tool_name":"update_clip","content":"ok"}"#,
        );

        let contents: Vec<&str> = fixture
            .history
            .get(&session_id)
            .unwrap()
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["Running tool: update_clip", "Tool update_clip finished: ok"]);
    }

    #[test]
    fn test_tool_request_registers_pending_request() {
        let mut fixture = Fixture::new();
        let notices = fixture.dispatch(
            &Dispatcher::default(),
            r#"{"type":"tool_request","request_id":"r-1","tool_name":"get_cursor","parameters":{"panel":"current"}}"#,
        );

        assert!(matches!(&notices[0], EngineNotice::ToolRequested { request_id, .. } if request_id == "r-1"));
        assert!(fixture.tools.get("r-1").is_some());
    }
}
