//! Interfaces of the external collaborators the engine consumes.
//!
//! Implementations live in `strudel-interaction` (HTTP) or are supplied by the
//! embedding application (pattern evaluation).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::panel::{Panel, PanelId, PanelPayload};
use crate::session::Message;

/// One page of persisted chat history, oldest message first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    /// More messages exist before `oldest_index`.
    pub has_more: bool,
    /// Index of the first message in the page.
    pub oldest_index: Option<u64>,
}

/// Bulk-fetch API for paginated chat history.
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Fetches up to `page_size` messages strictly older than `before_index`,
    /// or the newest page when `before_index` is `None`.
    async fn fetch_page(
        &self,
        session_id: &str,
        page_size: usize,
        before_index: Option<u64>,
    ) -> Result<HistoryPage>;
}

/// CRUD/list API used to hydrate a panel when only its identifier is known.
#[async_trait]
pub trait ItemCatalog: Send + Sync {
    /// Fetches the authoritative state of an item.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` (or an HTTP 404) when the item does not exist.
    async fn fetch_item(&self, panel_id: &PanelId) -> Result<Panel>;
}

/// Audio/pattern evaluation engine.
///
/// The engine only hands it the latest payload on explicit play requests.
pub trait PatternEvaluator: Send + Sync {
    fn evaluate(&self, panel_id: &PanelId, payload: &PanelPayload) -> Result<()>;
}
