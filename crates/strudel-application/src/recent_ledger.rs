//! Bounded, recency-ordered record of closed panels.

use std::sync::Arc;
use strudel_core::panel::PanelId;
use strudel_core::recent::{RecentItem, RecentItemRepository};

/// Recently closed panels, most recent first.
///
/// Re-recording an id moves it to the front; the oldest entry is evicted past
/// `capacity`. When a repository is attached, every change is written through;
/// a failed write is logged and the in-memory list stays authoritative.
pub struct RecentItemsLedger {
    items: Vec<RecentItem>,
    capacity: usize,
    repository: Option<Arc<dyn RecentItemRepository>>,
}

impl RecentItemsLedger {
    /// An in-memory ledger.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity: capacity.max(1),
            repository: None,
        }
    }

    /// A ledger backed by `repository`, seeded from what it holds.
    ///
    /// An unreadable store starts the ledger empty instead of failing.
    pub fn with_repository(capacity: usize, repository: Arc<dyn RecentItemRepository>) -> Self {
        let mut ledger = Self::new(capacity);
        match repository.load() {
            Ok(items) => {
                ledger.items = items;
                ledger.items.truncate(ledger.capacity);
            }
            Err(e) => {
                tracing::warn!("[RecentItemsLedger] Failed to load recent items: {}", e);
            }
        }
        ledger.repository = Some(repository);
        ledger
    }

    pub fn record(&mut self, item: RecentItem) {
        self.items.retain(|existing| existing.id != item.id);
        self.items.insert(0, item);
        self.items.truncate(self.capacity);
        self.persist();
    }

    pub fn remove(&mut self, id: &PanelId) -> Option<RecentItem> {
        let index = self.items.iter().position(|item| item.id == *id)?;
        let item = self.items.remove(index);
        self.persist();
        Some(item)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.persist();
    }

    pub fn items(&self) -> &[RecentItem] {
        &self.items
    }

    pub fn get(&self, id: &PanelId) -> Option<&RecentItem> {
        self.items.iter().find(|item| item.id == *id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn persist(&self) {
        if let Some(repository) = &self.repository
            && let Err(e) = repository.save(&self.items)
        {
            tracing::warn!("[RecentItemsLedger] Failed to persist recent items: {}", e);
        }
    }
}
