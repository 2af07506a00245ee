//! HTTP client for the backend's REST surface.
//!
//! Serves two collaborators: paginated chat history and item hydration.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use strudel_core::collaborator::{HistoryFetcher, HistoryPage, ItemCatalog};
use strudel_core::panel::{ItemKind, Panel, PanelId, PanelPayload};
use strudel_core::session::{Message, MessageRole};
use strudel_core::{Result, SyncError};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<StoredMessage>,
}

/// One persisted message as the backend returns it.
#[derive(Debug, Deserialize)]
struct StoredMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
    message_index: u64,
}

impl StoredMessage {
    fn into_message(self, session_id: &str) -> Message {
        let role = match self.role.as_str() {
            "user" => MessageRole::User,
            "assistant" | "agent" => MessageRole::Agent,
            _ => MessageRole::System,
        };
        let mut message = Message::new(role, self.content).with_index(self.message_index);
        message.id = format!("{}-{}", session_id, self.message_index);
        if let Some(timestamp) = self.timestamp.as_deref().and_then(parse_timestamp) {
            message.timestamp = timestamp;
        }
        message
    }
}

/// Accepts RFC 3339 and the offset-less ISO form the backend writes.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// reqwest-based client for `/api/messages` and `/api/{kind}s`.
#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    client: Client,
    base_url: Url,
    project_id: String,
}

impl HttpBackendClient {
    /// # Errors
    ///
    /// Returns `SyncError::Config` if `base_url` is not an http(s) URL.
    pub fn new(base_url: &str, project_id: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::config(format!("invalid api_base_url '{}': {}", base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(SyncError::config(format!(
                "api_base_url must use http or https, got '{}'",
                base_url.scheme()
            )));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            project_id: project_id.into(),
        })
    }

    /// Appends escaped path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::config(format!("api_base_url '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!("[HttpBackend] GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SyncError::transport(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                message: error_detail(&body).unwrap_or_else(|| status.to_string()),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::transport(format!("reading {} failed: {}", url, e)))?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Pulls `detail` out of an error body, if there is one.
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("detail")?.as_str().map(str::to_string)
}

fn collection_for(kind: ItemKind) -> Option<&'static str> {
    match kind {
        ItemKind::Clip => Some("clips"),
        ItemKind::Song => Some("songs"),
        ItemKind::Playlist => Some("playlists"),
        ItemKind::Reference => None,
    }
}

#[async_trait]
impl HistoryFetcher for HttpBackendClient {
    async fn fetch_page(
        &self,
        session_id: &str,
        page_size: usize,
        before_index: Option<u64>,
    ) -> Result<HistoryPage> {
        let mut url = self.endpoint(&["api", "messages", session_id])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page_size", &page_size.to_string());
            if let Some(before_index) = before_index {
                query.append_pair("before_index", &before_index.to_string());
            }
        }

        let response: MessagesResponse = self.get_json(url).await?;
        let has_more = page_size > 0 && response.messages.len() == page_size;
        let messages: Vec<Message> = response
            .messages
            .into_iter()
            .map(|stored| stored.into_message(session_id))
            .collect();
        let oldest_index = messages.first().and_then(|m| m.index);

        Ok(HistoryPage {
            messages,
            has_more,
            oldest_index,
        })
    }
}

#[async_trait]
impl ItemCatalog for HttpBackendClient {
    async fn fetch_item(&self, panel_id: &PanelId) -> Result<Panel> {
        let collection = collection_for(panel_id.kind())
            .ok_or_else(|| SyncError::not_found("item", panel_id.to_string()))?;
        let url = self.endpoint(&["api", collection, &self.project_id, panel_id.item_id()])?;

        let body: Value = self.get_json(url).await?;
        let payload = PanelPayload::from_value(panel_id.kind(), body)?;
        Ok(Panel::new(panel_id.item_id(), payload))
    }
}
