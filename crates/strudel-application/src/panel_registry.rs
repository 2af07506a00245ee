//! Ordered collection of open panels with a current-panel cursor.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use strudel_core::Result;
use strudel_core::panel::{Panel, PanelId, PanelPayload};

/// The carousel: open panels in opening order plus the focused index.
///
/// Operations on an empty registry or an unknown id are no-ops.
#[derive(Debug, Default)]
pub struct PanelRegistry {
    panels: Vec<Panel>,
    current: Option<usize>,
}

impl PanelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a panel, or focuses it when the id is already open.
    ///
    /// An already-open panel is never overwritten by the incoming one.
    ///
    /// # Returns
    ///
    /// `true` if the panel was added, `false` if an existing one was focused.
    pub fn load_panel(&mut self, panel: Panel) -> bool {
        if let Some(index) = self.position(&panel.id) {
            tracing::debug!("[PanelRegistry] {} already open, focusing", panel.id);
            self.current = Some(index);
            return false;
        }

        tracing::debug!("[PanelRegistry] Opened {}", panel.id);
        self.panels.push(panel);
        self.current = Some(self.panels.len() - 1);
        true
    }

    /// Closes a panel and keeps the cursor on a sensible neighbour.
    pub fn close_panel(&mut self, id: &PanelId) -> Option<Panel> {
        let index = self.position(id)?;
        let panel = self.panels.remove(index);

        self.current = match self.current {
            _ if self.panels.is_empty() => None,
            Some(current) if index < current => Some(current - 1),
            Some(current) if index == current => Some(current.min(self.panels.len() - 1)),
            other => other,
        };

        tracing::debug!("[PanelRegistry] Closed {}", id);
        Some(panel)
    }

    /// Merges the given fields into a panel's payload and refreshes its
    /// timestamp. The dirty flag is left to the caller.
    ///
    /// # Returns
    ///
    /// `Ok(false)` when the panel is not open.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the fields do not fit the panel's kind; the
    /// panel is left unchanged.
    pub fn update_panel(&mut self, id: &PanelId, fields: &Map<String, Value>) -> Result<bool> {
        let Some(panel) = self.get_mut(id) else {
            return Ok(false);
        };
        panel.payload.merge_fields(fields)?;
        panel.updated_at = Utc::now();
        Ok(true)
    }

    /// Replaces a panel's payload wholesale, e.g. with a freshly fetched copy.
    pub fn replace_payload(&mut self, id: &PanelId, payload: PanelPayload) -> bool {
        let Some(panel) = self.get_mut(id) else {
            return false;
        };
        panel.payload = payload;
        panel.updated_at = Utc::now();
        true
    }

    pub fn set_dirty(&mut self, id: &PanelId, dirty: bool) -> bool {
        match self.get_mut(id) {
            Some(panel) => {
                panel.dirty = dirty;
                true
            }
            None => false,
        }
    }

    pub fn focus(&mut self, id: &PanelId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.current = Some(index);
                true
            }
            None => false,
        }
    }

    /// Moves the cursor forward, wrapping at the end.
    pub fn next(&mut self) -> Option<&Panel> {
        let len = self.panels.len();
        let current = self.current?;
        self.current = Some((current + 1) % len);
        self.current()
    }

    /// Moves the cursor backward, wrapping at the start.
    pub fn previous(&mut self) -> Option<&Panel> {
        let len = self.panels.len();
        let current = self.current?;
        self.current = Some((current + len - 1) % len);
        self.current()
    }

    pub fn current(&self) -> Option<&Panel> {
        self.current.and_then(|index| self.panels.get(index))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn get(&self, id: &PanelId) -> Option<&Panel> {
        self.panels.iter().find(|panel| panel.id == *id)
    }

    pub fn contains(&self, id: &PanelId) -> bool {
        self.position(id).is_some()
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn clear(&mut self) {
        self.panels.clear();
        self.current = None;
    }

    /// Panels last touched before `instant`.
    pub fn stale_since(&self, instant: DateTime<Utc>) -> Vec<PanelId> {
        self.panels
            .iter()
            .filter(|panel| panel.updated_at < instant)
            .map(|panel| panel.id.clone())
            .collect()
    }

    fn position(&self, id: &PanelId) -> Option<usize> {
        self.panels.iter().position(|panel| panel.id == *id)
    }

    fn get_mut(&mut self, id: &PanelId) -> Option<&mut Panel> {
        self.panels.iter_mut().find(|panel| panel.id == *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strudel_core::panel::{ClipPayload, ItemKind};

    fn clip(id: &str) -> Panel {
        Panel::new(
            id,
            PanelPayload::Clip(ClipPayload {
                name: id.to_string(),
                code: format!("s(\"{}\")", id),
                metadata: Map::new(),
            }),
        )
    }

    fn id(item_id: &str) -> PanelId {
        PanelId::new(ItemKind::Clip, item_id)
    }

    fn registry_of(ids: &[&str]) -> PanelRegistry {
        let mut registry = PanelRegistry::new();
        for item_id in ids {
            registry.load_panel(clip(item_id));
        }
        registry
    }

    #[test]
    fn test_kick_bass_carousel_scenario() {
        let mut registry = PanelRegistry::new();

        assert!(registry.load_panel(clip("kick")));
        assert_eq!(registry.current_index(), Some(0));
        assert!(registry.load_panel(clip("bass")));
        assert_eq!(registry.current_index(), Some(1));

        // reopening kick focuses it without a duplicate
        assert!(!registry.load_panel(clip("kick")));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.current().unwrap().id, id("kick"));

        // closing the focused panel moves focus to bass
        registry.close_panel(&id("kick"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.current().unwrap().id, id("bass"));

        registry.close_panel(&id("bass"));
        assert!(registry.current().is_none());
        assert!(registry.current_index().is_none());
    }

    #[test]
    fn test_load_existing_does_not_overwrite() {
        let mut registry = registry_of(&["kick"]);
        let mut replacement = clip("kick");
        replacement.payload = PanelPayload::Clip(ClipPayload {
            name: "other".to_string(),
            ..Default::default()
        });

        registry.load_panel(replacement);
        assert_eq!(registry.get(&id("kick")).unwrap().title(), "kick");
    }

    #[test]
    fn test_close_reindexes_cursor() {
        // removed before the cursor: cursor shifts down
        let mut registry = registry_of(&["a", "b", "c"]);
        registry.focus(&id("c"));
        registry.close_panel(&id("a"));
        assert_eq!(registry.current().unwrap().id, id("c"));
        assert_eq!(registry.current_index(), Some(1));

        // removed after the cursor: unchanged
        let mut registry = registry_of(&["a", "b", "c"]);
        registry.focus(&id("a"));
        registry.close_panel(&id("c"));
        assert_eq!(registry.current_index(), Some(0));

        // removed at the cursor at the end: clamps to the new last
        let mut registry = registry_of(&["a", "b", "c"]);
        registry.close_panel(&id("c"));
        assert_eq!(registry.current().unwrap().id, id("b"));

        // removed at the cursor in the middle: the next panel slides in
        let mut registry = registry_of(&["a", "b", "c"]);
        registry.focus(&id("b"));
        registry.close_panel(&id("b"));
        assert_eq!(registry.current().unwrap().id, id("c"));
    }

    #[test]
    fn test_next_previous_wrap() {
        let mut registry = registry_of(&["a", "b", "c"]);
        assert_eq!(registry.next().unwrap().id, id("a"));
        assert_eq!(registry.previous().unwrap().id, id("c"));
        assert_eq!(registry.previous().unwrap().id, id("b"));
    }

    #[test]
    fn test_empty_registry_is_safe() {
        let mut registry = PanelRegistry::new();
        assert!(registry.next().is_none());
        assert!(registry.previous().is_none());
        assert!(registry.close_panel(&id("kick")).is_none());
        assert!(!registry.focus(&id("kick")));
        assert!(!registry.set_dirty(&id("kick"), true));
        assert!(!registry.update_panel(&id("kick"), &Map::new()).unwrap());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_update_merges_and_touches() {
        let mut registry = registry_of(&["kick"]);
        let before = registry.get(&id("kick")).unwrap().updated_at;

        let fields = json!({ "code": "s(\"bd*2\")" });
        assert!(registry
            .update_panel(&id("kick"), fields.as_object().unwrap())
            .unwrap());

        let panel = registry.get(&id("kick")).unwrap();
        assert!(panel.updated_at >= before);
        match &panel.payload {
            PanelPayload::Clip(clip) => {
                assert_eq!(clip.code, "s(\"bd*2\")");
                assert_eq!(clip.name, "kick");
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(!panel.dirty);
    }

    #[test]
    fn test_stale_since_filters_by_timestamp() {
        let mut registry = registry_of(&["old"]);
        let gap = Utc::now() + chrono::Duration::seconds(1);
        let mut fresh = clip("fresh");
        fresh.updated_at = gap + chrono::Duration::seconds(1);
        registry.load_panel(fresh);

        assert_eq!(registry.stale_since(gap), vec![id("old")]);
    }
}
