//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8034/ws";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8034";

/// Exponential backoff settings for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry; attempt n waits `base_delay_ms * 2^(n-1)`.
    pub base_delay_ms: u64,
    /// Retries before the connection gives up and enters the error state.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given 1-based retry attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exponent))
    }
}

/// Settings for the sync engine, usually loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// WebSocket endpoint of the agent server.
    pub server_url: String,
    /// Base URL of the REST API (history pages, item hydration).
    pub api_base_url: String,
    /// Project whose items are opened by id.
    pub project_id: String,
    pub client_version: String,
    /// Session id for the handshake; a fresh UUID is used when absent.
    pub client_session_id: Option<String>,
    pub reconnect: ReconnectConfig,
    pub keepalive_interval_ms: u64,
    pub keepalive_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub recent_items_capacity: usize,
    pub history_page_size: usize,
    /// Open panels for items the server reports as created.
    pub auto_load_created: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            project_id: "default".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            client_session_id: None,
            reconnect: ReconnectConfig::default(),
            keepalive_interval_ms: 30_000,
            keepalive_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            recent_items_capacity: 20,
            history_page_size: 50,
            auto_load_created: false,
        }
    }
}

impl SyncConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
