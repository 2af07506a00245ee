//! Transport abstraction for the agent connection.
//!
//! A `Connector` opens one link per connection attempt. The link is a pair of
//! channels so the connection driver can wait on inbound frames without
//! holding a borrow on the socket.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame.
    Frame(String),
    /// The link is gone; no more frames follow.
    Closed { reason: Option<String> },
}

/// An open bidirectional link.
///
/// Dropping the link closes it.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Queues one text frame for the wire.
    ///
    /// Fails only when the writer side is already gone, which the driver
    /// treats like a closure.
    pub fn send(&self, frame: String) -> std::result::Result<(), String> {
        self.outbound
            .send(frame)
            .map_err(|_| "transport writer closed".to_string())
    }
}

/// Opens links to the agent server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new link.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the server cannot be reached; the
    /// connection driver routes that into the reconnect path.
    async fn connect(&self) -> Result<TransportLink>;
}
