//! One conversation per open panel.

use chrono::Utc;
use std::collections::HashMap;
use strudel_core::panel::PanelId;
use strudel_core::session::{Session, SessionStatus};

/// Sessions keyed by panel, with a reverse index for inbound session ids.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<PanelId, Session>,
    by_session_id: HashMap<String, PanelId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the panel's session, creating an idle one on first use.
    pub fn get_or_create(&mut self, panel_id: &PanelId) -> &Session {
        let by_session_id = &mut self.by_session_id;
        self.sessions.entry(panel_id.clone()).or_insert_with(|| {
            let session = Session::new(panel_id.clone());
            tracing::debug!("[SessionRegistry] New session {} for {}", session.id, panel_id);
            by_session_id.insert(session.id.clone(), panel_id.clone());
            session
        })
    }

    pub fn get(&self, panel_id: &PanelId) -> Option<&Session> {
        self.sessions.get(panel_id)
    }

    /// Sets the status; `error` replaces the stored error detail.
    pub fn update_status(
        &mut self,
        panel_id: &PanelId,
        status: SessionStatus,
        error: Option<String>,
    ) -> bool {
        self.modify(panel_id, |session| {
            session.status = status;
            session.error = error;
        })
    }

    pub fn touch(&mut self, panel_id: &PanelId) -> bool {
        self.modify(panel_id, |_| {})
    }

    pub fn set_connection_id(&mut self, panel_id: &PanelId, connection_id: Option<String>) -> bool {
        self.modify(panel_id, |session| session.connection_id = connection_id)
    }

    pub fn set_agent_typing(&mut self, panel_id: &PanelId, typing: bool) -> bool {
        self.modify(panel_id, |session| session.agent_typing = typing)
    }

    /// Resolves an inbound session id to its session.
    pub fn find_by_session_id(&self, session_id: &str) -> Option<&Session> {
        self.by_session_id
            .get(session_id)
            .and_then(|panel_id| self.sessions.get(panel_id))
    }

    pub fn remove(&mut self, panel_id: &PanelId) -> Option<Session> {
        let session = self.sessions.remove(panel_id)?;
        self.by_session_id.remove(&session.id);
        tracing::debug!("[SessionRegistry] Removed session {} for {}", session.id, panel_id);
        Some(session)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // Targeted merge; every change counts as activity.
    fn modify<F>(&mut self, panel_id: &PanelId, change: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        match self.sessions.get_mut(panel_id) {
            Some(session) => {
                change(session);
                session.last_active_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strudel_core::panel::ItemKind;

    fn kick() -> PanelId {
        PanelId::new(ItemKind::Clip, "kick")
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut registry = SessionRegistry::new();
        let first = registry.get_or_create(&kick()).id.clone();
        let second = registry.get_or_create(&kick()).id.clone();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&kick()).unwrap().status, SessionStatus::Idle);
    }

    #[test]
    fn test_find_by_session_id_and_remove() {
        let mut registry = SessionRegistry::new();
        let session_id = registry.get_or_create(&kick()).id.clone();

        assert_eq!(registry.find_by_session_id(&session_id).unwrap().panel_id, kick());

        registry.remove(&kick());
        assert!(registry.find_by_session_id(&session_id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_updates_refresh_activity() {
        let mut registry = SessionRegistry::new();
        let created = registry.get_or_create(&kick()).last_active_at;

        assert!(registry.update_status(&kick(), SessionStatus::Error, Some("boom".to_string())));
        assert!(registry.set_connection_id(&kick(), Some("pwa-1".to_string())));

        let session = registry.get(&kick()).unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error.as_deref(), Some("boom"));
        assert_eq!(session.connection_id.as_deref(), Some("pwa-1"));
        assert!(session.last_active_at >= created);
    }

    #[test]
    fn test_absent_panel_is_noop() {
        let mut registry = SessionRegistry::new();
        assert!(!registry.touch(&kick()));
        assert!(!registry.update_status(&kick(), SessionStatus::Active, None));
        assert!(!registry.set_agent_typing(&kick(), true));
        assert!(registry.remove(&kick()).is_none());
    }
}
