//! Connection state as observed by everything outside the connection driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// States of the agent connection.
///
/// `disconnected → connecting → connected → handshaking → ready`, with
/// `reconnecting` after an unexpected closure and `error` once retries are
/// exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Handshaking,
    Ready,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// A transport is open or being opened.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Handshaking
                | ConnectionState::Ready
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the connection record.
///
/// Published by the connection driver through a `tokio::sync::watch` channel;
/// the driver is the only writer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    /// Outbound messages waiting for the connection to become ready.
    pub queued: usize,
    pub reconnect_attempt: u32,
    pub connected_at: Option<DateTime<Utc>>,
    /// Start of the most recent gap in connectivity.
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Client-chosen session id sent in the handshake.
    pub session_id: String,
    /// Server-assigned connection id from the last handshake ack.
    pub connection_id: Option<String>,
    /// Opaque session info returned with the handshake ack.
    pub session_info: Option<Value>,
}
