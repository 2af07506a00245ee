//! Network adapters: the WebSocket transport and the REST collaborators.

pub mod http_backend;
pub mod ws_connector;

pub use http_backend::HttpBackendClient;
pub use ws_connector::WsConnector;
