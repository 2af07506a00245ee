//! WebSocket transport for the agent connection.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use strudel_core::transport::{Connector, TransportEvent, TransportLink};
use strudel_core::{Result, SyncError};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

/// Opens one WebSocket per connection attempt.
///
/// Each link runs a writer task fed by the link's outbound channel and a
/// reader task that forwards text frames. Dropping the link ends both.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    /// # Errors
    ///
    /// Returns `SyncError::Config` if `server_url` is not a ws:// or wss:// URL.
    pub fn new(server_url: &str, connect_timeout: Duration) -> Result<Self> {
        let url = Url::parse(server_url)
            .map_err(|e| SyncError::config(format!("invalid server_url '{}': {}", server_url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::config(format!(
                "server_url must use ws or wss, got '{}'",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            connect_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<TransportLink> {
        tracing::debug!("[WsConnector] Connecting to {}", self.url);
        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| SyncError::transport(format!("timed out connecting to {}", self.url)))?
                .map_err(|e| SyncError::transport(format!("{}: {}", self.url, e)))?;

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(frame)).await {
                    tracing::debug!("[WsConnector] Send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        if inbound_tx.send(TransportEvent::Frame(text)).is_err() {
                            // link dropped by the driver
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    }
                    // pings are answered by tungstenite; binary frames are not part of the protocol
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };
            let _ = inbound_tx.send(TransportEvent::Closed { reason });
        });

        tracing::info!("[WsConnector] Connected to {}", self.url);
        Ok(TransportLink::new(outbound_tx, inbound_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_rejects_non_websocket_urls() {
        let timeout = Duration::from_secs(1);
        assert!(WsConnector::new("http://localhost:8034/ws", timeout).is_err());
        assert!(WsConnector::new("not a url", timeout).is_err());
        assert!(WsConnector::new("wss://agent.example/ws", timeout).is_ok());
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let received = match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => text,
                other => panic!("unexpected message {:?}", other),
            };
            ws.send(WsMessage::Text(format!("echo:{}", received)))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let connector =
            WsConnector::new(&format!("ws://{}/ws", addr), Duration::from_secs(5)).unwrap();
        let mut link = connector.connect().await.unwrap();

        link.send(r#"{"type":"keepalive"}"#.to_string()).unwrap();
        assert_eq!(
            link.inbound.recv().await.unwrap(),
            TransportEvent::Frame(r#"echo:{"type":"keepalive"}"#.to_string())
        );
        assert!(matches!(
            link.inbound.recv().await.unwrap(),
            TransportEvent::Closed { .. }
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_transport_error() {
        // bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let connector =
            WsConnector::new(&format!("ws://{}/ws", addr), Duration::from_secs(5)).unwrap();

        let err = connector.connect().await.unwrap_err();
        assert!(err.is_transport());
    }
}
