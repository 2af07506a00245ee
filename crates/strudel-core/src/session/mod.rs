//! Session domain module.
//!
//! # Module Structure
//!
//! - `model`: One conversation bound to one panel (`Session`, `SessionStatus`)
//! - `message`: Chat history entries (`Message`, `MessageRole`)

mod message;
mod model;

pub use message::{Message, MessageRole};
pub use model::{Session, SessionStatus};
