//! Outbound message queue.

use std::collections::VecDeque;
use strudel_core::protocol::OutboundMessage;

/// Messages waiting for the connection to become ready, in send order.
///
/// The queue lives in memory only. A restarted process starts fresh with an
/// empty queue; nothing is dropped while the process is alive.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<OutboundMessage>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: OutboundMessage) {
        self.items.push_back(message);
    }

    /// Puts messages back at the head, keeping their relative order.
    ///
    /// Used when a flush is interrupted by a transport failure.
    pub fn requeue_front(&mut self, messages: Vec<OutboundMessage>) {
        for message in messages.into_iter().rev() {
            self.items.push_front(message);
        }
    }

    /// Removes every queued message in insertion order.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
