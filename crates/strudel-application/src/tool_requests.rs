//! Tool requests from the server awaiting an answer from the UI.

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolRequest {
    pub request_id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub deadline: Instant,
}

/// Open tool requests keyed by request id.
#[derive(Debug, Default)]
pub struct PendingToolRequests {
    pending: HashMap<String, PendingToolRequest>,
}

impl PendingToolRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        request_id: impl Into<String>,
        tool_name: impl Into<String>,
        parameters: Value,
        timeout: Duration,
        now: Instant,
    ) {
        let request_id = request_id.into();
        self.pending.insert(
            request_id.clone(),
            PendingToolRequest {
                request_id,
                tool_name: tool_name.into(),
                parameters,
                deadline: now + timeout,
            },
        );
    }

    /// Takes a request that is still answerable at `now`.
    ///
    /// Unknown and expired ids yield `None`; an expired entry is dropped.
    pub fn take(&mut self, request_id: &str, now: Instant) -> Option<PendingToolRequest> {
        let request = self.pending.remove(request_id)?;
        if now > request.deadline {
            tracing::debug!("[ToolRequests] {} answered after its deadline", request_id);
            return None;
        }
        Some(request)
    }

    /// Drops every request past its deadline and returns their ids.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let mut expired: Vec<String> = self
            .pending
            .values()
            .filter(|request| now > request.deadline)
            .map(|request| request.request_id.clone())
            .collect();
        expired.sort();
        for request_id in &expired {
            self.pending.remove(request_id);
        }
        expired
    }

    pub fn get(&self, request_id: &str) -> Option<&PendingToolRequest> {
        self.pending.get(request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
