//! Domain layer of the Strudel sync engine.
//!
//! Holds the models shared by every other crate (panels, sessions, messages,
//! recent items, connection state), the wire protocol, configuration, the
//! shared error type, and the traits at the seams to external collaborators.

pub mod collaborator;
pub mod config;
pub mod connection;
pub mod error;
pub mod panel;
pub mod protocol;
pub mod recent;
pub mod session;
pub mod transport;

// Re-export common error type
pub use error::{Result, SyncError};
