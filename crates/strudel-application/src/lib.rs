//! Application layer of the Strudel sync engine.
//!
//! Owns the in-memory stores, the connection driver, and the engine that ties
//! them together.

pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod history_store;
pub mod notice;
pub mod panel_registry;
pub mod recent_ledger;
pub mod session_registry;
pub mod tool_requests;

pub use connection::{ConnectionEvent, ConnectionHandle};
pub use engine::{EngineCollaborators, SyncEngine};
pub use notice::EngineNotice;
pub use recent_ledger::RecentItemsLedger;
