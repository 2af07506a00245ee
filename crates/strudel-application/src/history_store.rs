//! Per-session chat history with backward pagination.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use strudel_core::collaborator::HistoryPage;
use strudel_core::session::{Message, MessageRole};

/// Messages of one session, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatHistory {
    pub messages: Vec<Message>,
    /// The server may hold messages older than the first loaded one.
    pub has_more_older: bool,
    /// Index of the oldest message loaded from the server; the cursor for the
    /// next backward page.
    pub oldest_loaded_index: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            has_more_older: true,
            oldest_loaded_index: None,
            updated_at: Utc::now(),
        }
    }
}

impl ChatHistory {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Chat histories keyed by session id.
#[derive(Debug, Default)]
pub struct HistoryStore {
    histories: HashMap<String, ChatHistory>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<&ChatHistory> {
        self.histories.get(session_id)
    }

    pub fn add_message(&mut self, session_id: &str, message: Message) {
        let history = self.entry(session_id);
        history.messages.push(message);
        history.touch();
    }

    pub fn add_messages(&mut self, session_id: &str, messages: Vec<Message>) {
        let history = self.entry(session_id);
        history.messages.extend(messages);
        history.touch();
    }

    /// Splices an older page in front of what is loaded.
    ///
    /// `older` must already be in chronological order and strictly older than
    /// the current head; no deduplication happens here.
    pub fn prepend_messages(
        &mut self,
        session_id: &str,
        older: Vec<Message>,
        has_more: bool,
        oldest_index: Option<u64>,
    ) {
        let history = self.entry(session_id);
        let mut messages = older;
        messages.append(&mut history.messages);
        history.messages = messages;
        history.has_more_older = has_more;
        if oldest_index.is_some() {
            history.oldest_loaded_index = oldest_index;
        }
        history.touch();
    }

    /// Applies `change` to the message with the given id.
    pub fn update_message<F>(&mut self, session_id: &str, message_id: &str, change: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let Some(history) = self.histories.get_mut(session_id) else {
            return false;
        };
        let Some(message) = history.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        change(message);
        history.touch();
        true
    }

    pub fn remove_message(&mut self, session_id: &str, message_id: &str) -> Option<Message> {
        let history = self.histories.get_mut(session_id)?;
        let index = history.messages.iter().position(|m| m.id == message_id)?;
        let message = history.messages.remove(index);
        history.touch();
        Some(message)
    }

    /// Empties a history but keeps it registered.
    pub fn clear(&mut self, session_id: &str) {
        if let Some(history) = self.histories.get_mut(session_id) {
            *history = ChatHistory::default();
        }
    }

    pub fn remove(&mut self, session_id: &str) -> Option<ChatHistory> {
        self.histories.remove(session_id)
    }

    /// Adds one chunk of an agent response.
    ///
    /// Chunks extend the trailing agent message while it is incomplete; a
    /// final chunk completes it. A chunk with nothing to extend starts a new
    /// message.
    pub fn append_agent_chunk(&mut self, session_id: &str, content: &str, is_final: bool) {
        let history = self.entry(session_id);
        match history.messages.last_mut() {
            Some(last) if last.role == MessageRole::Agent && !last.complete => {
                last.content.push_str(content);
                last.complete = is_final;
            }
            _ => {
                let mut message = Message::agent(content);
                message.complete = is_final;
                history.messages.push(message);
            }
        }
        history.touch();
    }

    /// Merges the newest persisted page after a reconnect.
    ///
    /// Provisional local messages matching a persisted one by role and content
    /// take its index; persisted messages not yet present are added. The
    /// history is then ordered by index with unmatched provisional messages
    /// last.
    ///
    /// # Returns
    ///
    /// The number of messages added.
    pub fn reconcile(&mut self, session_id: &str, page: &HistoryPage) -> usize {
        let history = self.entry(session_id);
        let mut added = 0;

        for persisted in &page.messages {
            let Some(index) = persisted.index else {
                continue;
            };
            if history.messages.iter().any(|m| m.index == Some(index)) {
                continue;
            }
            let provisional = history.messages.iter_mut().find(|m| {
                m.is_provisional() && m.role == persisted.role && m.content == persisted.content
            });
            match provisional {
                Some(local) => local.index = Some(index),
                None => {
                    history.messages.push(persisted.clone());
                    added += 1;
                }
            }
        }

        history
            .messages
            .sort_by_key(|m| m.index.unwrap_or(u64::MAX));
        if history.oldest_loaded_index.is_none() {
            history.oldest_loaded_index = page.oldest_index;
            history.has_more_older = page.has_more;
        }
        history.touch();
        added
    }

    fn entry(&mut self, session_id: &str) -> &mut ChatHistory {
        self.histories.entry(session_id.to_string()).or_default()
    }
}
