//! Agent connection: state machine, outbound queue, and the task driving them.

mod driver;
mod machine;
mod queue;

pub use driver::{ConnectionCommand, ConnectionEvent, ConnectionHandle, spawn};
pub use machine::{ConnectionMachine, Effect};
pub use queue::MessageQueue;
