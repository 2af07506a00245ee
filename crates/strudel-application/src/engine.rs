//! The sync engine: one context object owning every store.
//!
//! UI actions call into the engine directly; inbound traffic arrives as
//! [`ConnectionEvent`]s that the host feeds to [`SyncEngine::process_event`].

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use strudel_core::collaborator::{HistoryFetcher, ItemCatalog, PatternEvaluator};
use strudel_core::config::SyncConfig;
use strudel_core::connection::{ConnectionSnapshot, ConnectionState};
use strudel_core::panel::{Panel, PanelId};
use strudel_core::protocol::{InboundMessage, OutboundMessage, ToolOutcome};
use strudel_core::recent::RecentItem;
use strudel_core::session::{Message, Session, SessionStatus};
use strudel_core::{Result, SyncError};
use tokio::sync::mpsc;

use crate::connection::{ConnectionEvent, ConnectionHandle};
use crate::dispatcher::{DispatchTargets, Dispatcher};
use crate::history_store::{ChatHistory, HistoryStore};
use crate::notice::EngineNotice;
use crate::panel_registry::PanelRegistry;
use crate::recent_ledger::RecentItemsLedger;
use crate::session_registry::SessionRegistry;
use crate::tool_requests::PendingToolRequests;

/// External services the engine calls out to.
#[derive(Clone)]
pub struct EngineCollaborators {
    pub catalog: Arc<dyn ItemCatalog>,
    pub history: Arc<dyn HistoryFetcher>,
    pub evaluator: Arc<dyn PatternEvaluator>,
}

pub struct SyncEngine {
    config: SyncConfig,
    connection: ConnectionHandle,
    collaborators: EngineCollaborators,
    dispatcher: Dispatcher,
    panels: PanelRegistry,
    sessions: SessionRegistry,
    history: HistoryStore,
    recent: RecentItemsLedger,
    tools: PendingToolRequests,
    subscribers: Vec<mpsc::UnboundedSender<EngineNotice>>,
    /// Start of the connectivity gap still to be resynchronized.
    resync_since: Option<DateTime<Utc>>,
    was_ready: bool,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        connection: ConnectionHandle,
        collaborators: EngineCollaborators,
        recent: RecentItemsLedger,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(config.auto_load_created),
            config,
            connection,
            collaborators,
            panels: PanelRegistry::new(),
            sessions: SessionRegistry::new(),
            history: HistoryStore::new(),
            recent,
            tools: PendingToolRequests::new(),
            subscribers: Vec::new(),
            resync_since: None,
            was_ready: false,
        }
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    pub fn connect(&self) -> Result<()> {
        self.connection.connect()
    }

    pub fn disconnect(&self) -> Result<()> {
        self.connection.disconnect()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection_snapshot(&self) -> ConnectionSnapshot {
        self.connection.snapshot()
    }

    // ------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------

    /// Opens a panel the caller already holds, or focuses the open one.
    pub fn load_panel(&mut self, panel: Panel) -> bool {
        self.panels.load_panel(panel)
    }

    /// Opens an item by id, fetching it when it is not already open.
    ///
    /// # Errors
    ///
    /// Returns the catalog's error when the item cannot be fetched.
    pub async fn open_item(&mut self, panel_id: &PanelId) -> Result<()> {
        if self.panels.focus(panel_id) {
            return Ok(());
        }
        let panel = self.collaborators.catalog.fetch_item(panel_id).await?;
        if panel.id != *panel_id {
            return Err(SyncError::protocol(format!(
                "catalog returned {} for {}",
                panel.id, panel_id
            )));
        }
        self.panels.load_panel(panel);
        Ok(())
    }

    /// Closes a panel, remembering it in the recent-items ledger and dropping
    /// its session and history.
    pub fn close_panel(&mut self, panel_id: &PanelId) -> Option<RecentItem> {
        let panel = self.panels.close_panel(panel_id)?;
        let item = RecentItem::from_panel(&panel);
        self.recent.record(item.clone());

        if let Some(session) = self.sessions.remove(panel_id) {
            self.history.remove(&session.id);
        }
        tracing::info!("[SyncEngine] Closed {}", panel_id);
        Some(item)
    }

    /// Applies a local edit and marks the panel dirty.
    ///
    /// # Returns
    ///
    /// `Ok(false)` when the panel is not open.
    ///
    /// # Errors
    ///
    /// `SyncError::ReadOnly` for reference panels; a protocol error when the
    /// fields do not fit the panel's kind.
    pub fn edit_panel(&mut self, panel_id: &PanelId, fields: &Map<String, Value>) -> Result<bool> {
        if !panel_id.kind().is_editable() {
            return Err(SyncError::ReadOnly(panel_id.to_string()));
        }
        if !self.panels.update_panel(panel_id, fields)? {
            return Ok(false);
        }
        self.panels.set_dirty(panel_id, true);
        Ok(true)
    }

    pub fn focus(&mut self, panel_id: &PanelId) -> bool {
        self.panels.focus(panel_id)
    }

    pub fn next_panel(&mut self) -> Option<&Panel> {
        self.panels.next()
    }

    pub fn previous_panel(&mut self) -> Option<&Panel> {
        self.panels.previous()
    }

    pub fn current_panel(&self) -> Option<&Panel> {
        self.panels.current()
    }

    pub fn panels(&self) -> &PanelRegistry {
        &self.panels
    }

    /// Closes every panel without recording them as recent.
    pub fn clear_panels(&mut self) {
        let ids: Vec<PanelId> = self.panels.panels().iter().map(|p| p.id.clone()).collect();
        for id in &ids {
            if let Some(session) = self.sessions.remove(id) {
                self.history.remove(&session.id);
            }
        }
        self.panels.clear();
    }

    /// Hands the focused panel to the pattern evaluator.
    ///
    /// # Returns
    ///
    /// `Ok(false)` when no panel is open.
    pub fn play_current(&self) -> Result<bool> {
        let Some(panel) = self.panels.current() else {
            return Ok(false);
        };
        self.collaborators
            .evaluator
            .evaluate(&panel.id, &panel.payload)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    /// Sends a chat message about a panel.
    ///
    /// The message is added to the history right away with a provisional
    /// index and is queued if the connection is not ready.
    ///
    /// # Returns
    ///
    /// The local message, or `None` when the panel is not open.
    pub fn send_chat(&mut self, panel_id: &PanelId, content: &str) -> Result<Option<Message>> {
        let Some(panel) = self.panels.get(panel_id) else {
            tracing::debug!("[SyncEngine] send_chat for closed panel {}", panel_id);
            return Ok(None);
        };
        let context = panel_context(panel);

        let session_id = self.session_for(panel_id);
        let message = Message::user(content);
        self.history.add_message(&session_id, message.clone());

        let status = if self.connection.state().is_ready() {
            SessionStatus::Active
        } else {
            SessionStatus::Connecting
        };
        self.sessions.update_status(panel_id, status, None);

        self.connection.send(OutboundMessage::SendMessage {
            session_id,
            content: content.to_string(),
            context: Some(context),
        })?;
        Ok(Some(message))
    }

    /// Loads the next older page of a panel's chat history.
    ///
    /// Without a server cursor yet, the newest page is fetched and reconciled
    /// with the live messages instead of being spliced in front of them.
    ///
    /// # Returns
    ///
    /// The number of messages added; zero when nothing older exists.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error; the history is left unchanged.
    pub async fn load_older_messages(&mut self, panel_id: &PanelId) -> Result<usize> {
        let Some(session) = self.sessions.get(panel_id) else {
            return Ok(0);
        };
        let session_id = session.id.clone();

        let cursor = match self.history.get(&session_id) {
            Some(history) if !history.has_more_older => return Ok(0),
            Some(history) => history
                .oldest_loaded_index
                .or_else(|| history.messages.iter().filter_map(|m| m.index).min()),
            None => None,
        };

        let page = self
            .collaborators
            .history
            .fetch_page(&session_id, self.config.history_page_size, cursor)
            .await?;

        // the session may have been closed while the page was in flight
        if self.sessions.get(panel_id).map(|s| &s.id) != Some(&session_id) {
            return Ok(0);
        }

        let count = match cursor {
            Some(_) => {
                let count = page.messages.len();
                self.history.prepend_messages(
                    &session_id,
                    page.messages,
                    page.has_more,
                    page.oldest_index,
                );
                count
            }
            None => self.history.reconcile(&session_id, &page),
        };
        tracing::debug!("[SyncEngine] Loaded {} older messages for {}", count, panel_id);
        Ok(count)
    }

    /// The panel's session id, creating the session bound to the current
    /// connection on first use.
    fn session_for(&mut self, panel_id: &PanelId) -> String {
        let session = self.sessions.get_or_create(panel_id);
        let session_id = session.id.clone();
        if session.connection_id.is_none()
            && let Some(connection_id) = self.connection.snapshot().connection_id
        {
            self.sessions.set_connection_id(panel_id, Some(connection_id));
        }
        session_id
    }

    pub fn session(&self, panel_id: &PanelId) -> Option<&Session> {
        self.sessions.get(panel_id)
    }

    pub fn history(&self, panel_id: &PanelId) -> Option<&ChatHistory> {
        let session = self.sessions.get(panel_id)?;
        self.history.get(&session.id)
    }

    // ------------------------------------------------------------------
    // Tool requests
    // ------------------------------------------------------------------

    /// Answers a tool request from the server.
    ///
    /// # Returns
    ///
    /// `Ok(false)` when the request is unknown or already expired.
    pub fn respond_tool_request(&mut self, request_id: &str, outcome: ToolOutcome) -> Result<bool> {
        if self.tools.take(request_id, Instant::now()).is_none() {
            tracing::debug!("[SyncEngine] No pending tool request {}", request_id);
            return Ok(false);
        }
        self.connection
            .send(outcome.into_response(request_id.to_string()))?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Recent items
    // ------------------------------------------------------------------

    pub fn recent_items(&self) -> &[RecentItem] {
        self.recent.items()
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// Subscribes to engine notices.
    pub fn subscribe_notices(&mut self) -> mpsc::UnboundedReceiver<EngineNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Applies one event from the connection driver.
    ///
    /// Notices are broadcast to subscribers and also returned.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Vec<EngineNotice> {
        let mut notices = Vec::new();

        match event {
            ConnectionEvent::StateChanged(state) => {
                if state.is_ready() {
                    self.was_ready = true;
                } else if self.was_ready && self.resync_since.is_none() {
                    self.resync_since = Some(Utc::now());
                }
                notices.push(EngineNotice::ConnectionChanged(state));
            }
            ConnectionEvent::Inbound(InboundMessage::HandshakeAck { connection_id, .. }) => {
                let panel_ids: Vec<PanelId> =
                    self.sessions.iter().map(|s| s.panel_id.clone()).collect();
                for panel_id in &panel_ids {
                    self.sessions
                        .set_connection_id(panel_id, Some(connection_id.clone()));
                }
            }
            ConnectionEvent::Inbound(message) => {
                let mut targets = DispatchTargets {
                    panels: &mut self.panels,
                    sessions: &mut self.sessions,
                    history: &mut self.history,
                    tools: &mut self.tools,
                };
                notices.extend(self.dispatcher.dispatch(message, &mut targets, Instant::now()));
            }
        }

        notices.extend(
            self.tools
                .expire(Instant::now())
                .into_iter()
                .map(|request_id| EngineNotice::ToolRequestExpired { request_id }),
        );

        self.broadcast(&notices);
        notices
    }

    /// Applies an event and resynchronizes once a reconnect completes.
    pub async fn process_event(&mut self, event: ConnectionEvent) -> Vec<EngineNotice> {
        let mut notices = self.handle_event(event);
        if self.needs_resync() {
            match self.resync().await {
                Ok(refreshed) => {
                    let notice = EngineNotice::Resynced { refreshed };
                    self.broadcast(std::slice::from_ref(&notice));
                    notices.push(notice);
                }
                Err(e) => tracing::warn!("[SyncEngine] Resync failed: {}", e),
            }
        }
        notices
    }

    /// A reconnect completed and the gap has not been resynchronized yet.
    pub fn needs_resync(&self) -> bool {
        self.resync_since.is_some() && self.connection.state().is_ready()
    }

    /// Re-fetches panels not touched since the connectivity gap began and
    /// merges the newest history page of every session.
    ///
    /// # Returns
    ///
    /// The number of panels re-fetched.
    ///
    /// # Errors
    ///
    /// Returns the first fetch error other than a missing item; the gap stays
    /// pending so a later call can retry.
    pub async fn resync(&mut self) -> Result<usize> {
        let Some(since) = self.resync_since else {
            return Ok(0);
        };
        tracing::info!("[SyncEngine] Resynchronizing state changed since {}", since);

        let mut refreshed = 0;
        for panel_id in self.panels.stale_since(since) {
            let fetched = match self.collaborators.catalog.fetch_item(&panel_id).await {
                Ok(panel) => panel,
                Err(e) if e.is_not_found_or_missing() => {
                    tracing::debug!("[SyncEngine] {} no longer exists remotely", panel_id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(current) = self.panels.get(&panel_id) else {
                continue;
            };
            if current.payload == fetched.payload {
                continue;
            }
            let was_dirty = current.dirty;
            self.panels.replace_payload(&panel_id, fetched.payload);
            self.panels.set_dirty(&panel_id, false);
            refreshed += 1;
            if was_dirty {
                let notice = EngineNotice::EditSuperseded { panel_id };
                self.broadcast(std::slice::from_ref(&notice));
            }
        }

        let sessions: Vec<String> = self.sessions.iter().map(|s| s.id.clone()).collect();
        for session_id in sessions {
            let page = self
                .collaborators
                .history
                .fetch_page(&session_id, self.config.history_page_size, None)
                .await?;
            self.history.reconcile(&session_id, &page);
        }

        self.resync_since = None;
        Ok(refreshed)
    }

    fn broadcast(&mut self, notices: &[EngineNotice]) {
        if notices.is_empty() {
            return;
        }
        self.subscribers.retain(|subscriber| {
            notices
                .iter()
                .all(|notice| subscriber.send(notice.clone()).is_ok())
        });
    }
}

/// Item context attached to chat messages.
fn panel_context(panel: &Panel) -> Value {
    json!({
        "item_type": panel.kind().as_str(),
        "item_id": panel.id.item_id(),
        "title": panel.title(),
        "item": panel.payload,
    })
}
