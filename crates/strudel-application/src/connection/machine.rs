//! Sans-IO connection state machine.
//!
//! Every input returns the effects the driver must carry out. The machine
//! never touches a socket or a timer itself, which keeps every transition
//! testable without a runtime.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use strudel_core::config::{ReconnectConfig, SyncConfig};
use strudel_core::connection::{ConnectionSnapshot, ConnectionState};
use strudel_core::protocol::{CLIENT_TYPE, InboundMessage, OutboundMessage};

use super::queue::MessageQueue;

/// Work requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    Transmit(OutboundMessage),
    ScheduleReconnect(Duration),
    CancelReconnect,
    StartKeepalive(Duration),
    StopKeepalive,
    /// Arms the single handshake/keepalive deadline, replacing any armed one.
    ArmDeadline(Duration),
    DisarmDeadline,
    Deliver(InboundMessage),
    StateChanged(ConnectionState),
}

/// Connection lifecycle, outbound queue, and pre-handshake buffering.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    session_id: String,
    client_version: String,
    reconnect: ReconnectConfig,
    keepalive_interval: Duration,
    keepalive_timeout: Duration,
    handshake_timeout: Duration,
    queue: MessageQueue,
    /// Inbound messages that arrived before the handshake ack.
    early_inbound: Vec<InboundMessage>,
    attempt: u32,
    awaiting_keepalive_ack: bool,
    last_error: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    disconnected_at: Option<DateTime<Utc>>,
    connection_id: Option<String>,
    session_info: Option<Value>,
}

impl ConnectionMachine {
    /// Creates a disconnected machine.
    ///
    /// # Arguments
    ///
    /// * `session_id` - Client-chosen session id sent in every handshake
    /// * `config` - Timing and retry settings
    pub fn new(session_id: impl Into<String>, config: &SyncConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session_id: session_id.into(),
            client_version: config.client_version.clone(),
            reconnect: config.reconnect.clone(),
            keepalive_interval: config.keepalive_interval(),
            keepalive_timeout: config.keepalive_timeout(),
            handshake_timeout: config.handshake_timeout(),
            queue: MessageQueue::new(),
            early_inbound: Vec::new(),
            attempt: 0,
            awaiting_keepalive_ack: false,
            last_error: None,
            connected_at: None,
            disconnected_at: None,
            connection_id: None,
            session_info: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            last_error: self.last_error.clone(),
            queued: self.queue.len(),
            reconnect_attempt: self.attempt,
            connected_at: self.connected_at,
            disconnected_at: self.disconnected_at,
            session_id: self.session_id.clone(),
            connection_id: self.connection_id.clone(),
            session_info: self.session_info.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Starts connecting; a no-op while a transport is open or opening.
    pub fn connect(&mut self) -> Vec<Effect> {
        if self.state.is_live() {
            tracing::debug!("[Connection] connect() ignored in state {}", self.state);
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.state == ConnectionState::Reconnecting {
            effects.push(Effect::CancelReconnect);
        }
        // manual connect always starts a fresh retry budget
        self.attempt = 0;
        self.enter(ConnectionState::Connecting, &mut effects);
        effects.push(Effect::OpenTransport);
        effects
    }

    /// Closes the connection on request. No retry follows; the queue is kept.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        let was_ready = self.state.is_ready();
        let had_transport = self.state.is_live();
        let mut effects = vec![
            Effect::CancelReconnect,
            Effect::StopKeepalive,
            Effect::DisarmDeadline,
        ];
        if had_transport {
            effects.push(Effect::CloseTransport);
        }
        if was_ready {
            self.disconnected_at = Some(Utc::now());
        }
        self.attempt = 0;
        self.awaiting_keepalive_ack = false;
        self.early_inbound.clear();
        self.enter(ConnectionState::Disconnected, &mut effects);
        tracing::info!("[Connection] Disconnected on request");
        effects
    }

    /// Transmits when ready, otherwise queues.
    pub fn send(&mut self, message: OutboundMessage) -> Vec<Effect> {
        if self.state.is_ready() {
            vec![Effect::Transmit(message)]
        } else {
            tracing::debug!(
                "[Connection] Queued {} while {} ({} waiting)",
                message.kind(),
                self.state,
                self.queue.len() + 1
            );
            self.queue.push(message);
            Vec::new()
        }
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    /// The transport opened: send the handshake and wait for the ack.
    pub fn on_transport_open(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            // disconnect() raced the open
            return vec![Effect::CloseTransport];
        }

        let mut effects = Vec::new();
        self.connected_at = Some(Utc::now());
        self.enter(ConnectionState::Connected, &mut effects);
        effects.push(Effect::Transmit(OutboundMessage::Handshake {
            session_id: self.session_id.clone(),
            client_type: CLIENT_TYPE.to_string(),
            client_version: self.client_version.clone(),
        }));
        self.enter(ConnectionState::Handshaking, &mut effects);
        effects.push(Effect::ArmDeadline(self.handshake_timeout));
        effects
    }

    /// Opening the transport failed.
    pub fn on_transport_failed(&mut self, reason: impl Into<String>) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.fail(reason.into())
    }

    /// The transport closed without being asked to.
    pub fn on_transport_closed(&mut self, reason: Option<String>) -> Vec<Effect> {
        match self.state {
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Error => Vec::new(),
            _ => self.fail(reason.unwrap_or_else(|| "connection closed".to_string())),
        }
    }

    /// A transmit failed mid-flight.
    ///
    /// `unsent` holds the message that failed plus every transmit that was
    /// still pending behind it. User messages go back to the head of the
    /// queue; handshakes and keepalives are regenerated on the next attempt.
    pub fn on_transmit_failed(
        &mut self,
        unsent: Vec<OutboundMessage>,
        reason: impl Into<String>,
    ) -> Vec<Effect> {
        let retained: Vec<OutboundMessage> = unsent
            .into_iter()
            .filter(|message| {
                matches!(
                    message,
                    OutboundMessage::SendMessage { .. } | OutboundMessage::ToolResponse { .. }
                )
            })
            .collect();
        self.queue.requeue_front(retained);
        self.on_transport_closed(Some(reason.into()))
    }

    /// One inbound text frame.
    pub fn on_frame(&mut self, frame: &str) -> Vec<Effect> {
        let message = match InboundMessage::decode(frame) {
            Ok(message) => message.normalize(),
            Err(e) => {
                tracing::warn!("[Connection] Dropping malformed frame: {}", e);
                return Vec::new();
            }
        };

        match self.state {
            ConnectionState::Connected | ConnectionState::Handshaking => {
                self.on_pre_ready_message(message)
            }
            ConnectionState::Ready => self.on_ready_message(message),
            state => {
                tracing::debug!(
                    "[Connection] Ignoring {} received while {}",
                    message.kind(),
                    state
                );
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub fn on_reconnect_due(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Reconnecting {
            return Vec::new();
        }
        tracing::info!("[Connection] Reconnect attempt {}", self.attempt);
        let mut effects = Vec::new();
        self.enter(ConnectionState::Connecting, &mut effects);
        effects.push(Effect::OpenTransport);
        effects
    }

    pub fn on_keepalive_tick(&mut self) -> Vec<Effect> {
        if !self.state.is_ready() {
            return Vec::new();
        }
        let mut effects = vec![Effect::Transmit(OutboundMessage::Keepalive {})];
        if !self.awaiting_keepalive_ack {
            self.awaiting_keepalive_ack = true;
            effects.push(Effect::ArmDeadline(self.keepalive_timeout));
        }
        effects
    }

    pub fn on_deadline_elapsed(&mut self) -> Vec<Effect> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Handshaking => {
                self.fail("handshake timed out".to_string())
            }
            ConnectionState::Ready if self.awaiting_keepalive_ack => {
                self.fail("keepalive timed out".to_string())
            }
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn enter(&mut self, state: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != state {
            tracing::debug!("[Connection] {} -> {}", self.state, state);
            self.state = state;
            effects.push(Effect::StateChanged(state));
        }
    }

    fn on_pre_ready_message(&mut self, message: InboundMessage) -> Vec<Effect> {
        let ack = match &message {
            InboundMessage::HandshakeAck {
                session_id,
                connection_id,
                session_info,
                ..
            } => Some((session_id.clone(), connection_id.clone(), session_info.clone())),
            _ => None,
        };

        let Some((session_id, connection_id, session_info)) = ack else {
            tracing::debug!("[Connection] Buffering {} until handshake_ack", message.kind());
            self.early_inbound.push(message);
            return Vec::new();
        };

        if session_id != self.session_id {
            tracing::warn!(
                "[Connection] Ignoring handshake_ack for session {} (expected {})",
                session_id,
                self.session_id
            );
            return Vec::new();
        }
        self.connection_id = Some(connection_id);
        self.session_info = session_info;
        self.become_ready(message)
    }

    fn on_ready_message(&mut self, message: InboundMessage) -> Vec<Effect> {
        match message {
            InboundMessage::KeepaliveAck {} => {
                if self.awaiting_keepalive_ack {
                    self.awaiting_keepalive_ack = false;
                    vec![Effect::DisarmDeadline]
                } else {
                    Vec::new()
                }
            }
            InboundMessage::HandshakeAck { .. } => {
                tracing::warn!("[Connection] Ignoring duplicate handshake_ack");
                Vec::new()
            }
            other => {
                if let InboundMessage::Error { ref message, .. } = other {
                    self.last_error = Some(message.clone());
                }
                vec![Effect::Deliver(other)]
            }
        }
    }

    fn become_ready(&mut self, ack: InboundMessage) -> Vec<Effect> {
        let mut effects = vec![Effect::DisarmDeadline];
        self.attempt = 0;
        self.last_error = None;
        self.awaiting_keepalive_ack = false;
        self.enter(ConnectionState::Ready, &mut effects);
        tracing::info!(
            "[Connection] Ready (connection {})",
            self.connection_id.as_deref().unwrap_or("-")
        );

        effects.push(Effect::Deliver(ack));
        effects.extend(self.early_inbound.drain(..).map(Effect::Deliver));
        effects.extend(self.queue.drain().into_iter().map(Effect::Transmit));
        effects.push(Effect::StartKeepalive(self.keepalive_interval));
        effects
    }

    /// Unexpected loss: schedule a retry or give up.
    fn fail(&mut self, reason: String) -> Vec<Effect> {
        let had_transport = matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Handshaking | ConnectionState::Ready
        );
        if self.state.is_ready() {
            self.disconnected_at = Some(Utc::now());
        }

        let mut effects = vec![Effect::StopKeepalive, Effect::DisarmDeadline];
        if had_transport {
            effects.push(Effect::CloseTransport);
        }
        self.awaiting_keepalive_ack = false;
        self.early_inbound.clear();
        self.last_error = Some(reason.clone());

        if self.attempt >= self.reconnect.max_attempts {
            tracing::error!(
                "[Connection] Giving up after {} reconnect attempts: {}",
                self.attempt,
                reason
            );
            self.enter(ConnectionState::Error, &mut effects);
            return effects;
        }

        self.attempt += 1;
        let delay = self.reconnect.delay_for(self.attempt);
        tracing::warn!(
            "[Connection] Lost connection ({}); retry {} in {:?}",
            reason,
            self.attempt,
            delay
        );
        self.enter(ConnectionState::Reconnecting, &mut effects);
        effects.push(Effect::ScheduleReconnect(delay));
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "client-session";

    fn config() -> SyncConfig {
        SyncConfig {
            client_version: "test".to_string(),
            ..Default::default()
        }
    }

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(SESSION, &config())
    }

    fn ack(session_id: &str) -> String {
        format!(
            r#"{{"type":"handshake_ack","session_id":"{}","connection_id":"pwa-1","is_reconnect":false}}"#,
            session_id
        )
    }

    fn chat(content: &str) -> OutboundMessage {
        OutboundMessage::SendMessage {
            session_id: "panel-session".to_string(),
            content: content.to_string(),
            context: None,
        }
    }

    fn ready_machine() -> ConnectionMachine {
        let mut m = machine();
        m.connect();
        m.on_transport_open();
        m.on_frame(&ack(SESSION));
        assert_eq!(m.state(), ConnectionState::Ready);
        m
    }

    fn transmitted(effects: &[Effect]) -> Vec<OutboundMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Transmit(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn delivered(effects: &[Effect]) -> Vec<&'static str> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Deliver(m) => Some(m.kind()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_connect_walks_through_handshake() {
        let mut m = machine();

        let effects = m.connect();
        assert_eq!(
            effects,
            vec![
                Effect::StateChanged(ConnectionState::Connecting),
                Effect::OpenTransport
            ]
        );

        let effects = m.on_transport_open();
        assert_eq!(effects[0], Effect::StateChanged(ConnectionState::Connected));
        assert!(matches!(
            &effects[1],
            Effect::Transmit(OutboundMessage::Handshake { session_id, client_type, .. })
                if session_id == SESSION && client_type == "pwa"
        ));
        assert_eq!(effects[2], Effect::StateChanged(ConnectionState::Handshaking));
        assert!(matches!(effects[3], Effect::ArmDeadline(_)));

        let effects = m.on_frame(&ack(SESSION));
        assert!(effects.contains(&Effect::StateChanged(ConnectionState::Ready)));
        assert!(effects.contains(&Effect::StartKeepalive(Duration::from_secs(30))));
        assert_eq!(m.snapshot().connection_id.as_deref(), Some("pwa-1"));
    }

    #[test]
    fn test_connect_is_noop_while_live() {
        let mut m = machine();
        m.connect();
        assert!(m.connect().is_empty());

        let mut m = ready_machine();
        assert!(m.connect().is_empty());
    }

    #[test]
    fn test_sends_queue_until_ready_then_flush_in_order() {
        let mut m = machine();
        assert!(m.send(chat("one")).is_empty());
        m.connect();
        assert!(m.send(chat("two")).is_empty());
        m.on_transport_open();
        assert!(m.send(chat("three")).is_empty());
        assert_eq!(m.queued(), 3);

        let effects = m.on_frame(&ack(SESSION));
        assert_eq!(transmitted(&effects), vec![chat("one"), chat("two"), chat("three")]);
        assert_eq!(m.queued(), 0);

        // once ready, sends go straight out
        assert_eq!(m.send(chat("four")), vec![Effect::Transmit(chat("four"))]);
    }

    #[test]
    fn test_messages_before_ack_are_delivered_after_it() {
        let mut m = machine();
        m.connect();
        m.on_transport_open();

        let early = r#"{"type":"agent_response","session_id":"panel-session","content":"hi"}"#;
        assert!(m.on_frame(early).is_empty());

        let effects = m.on_frame(&ack(SESSION));
        assert_eq!(delivered(&effects), vec!["handshake_ack", "agent_response"]);

        let ready_at = effects
            .iter()
            .position(|e| *e == Effect::StateChanged(ConnectionState::Ready))
            .unwrap();
        let first_delivery = effects
            .iter()
            .position(|e| matches!(e, Effect::Deliver(_)))
            .unwrap();
        assert!(ready_at < first_delivery);
    }

    #[test]
    fn test_non_matching_ack_is_ignored() {
        let mut m = machine();
        m.connect();
        m.on_transport_open();

        assert!(m.on_frame(&ack("someone-else")).is_empty());
        assert_eq!(m.state(), ConnectionState::Handshaking);
    }

    #[test]
    fn test_malformed_frame_is_dropped_without_state_change() {
        let mut m = ready_machine();
        assert!(m.on_frame("{not json").is_empty());
        assert!(m.on_frame(r#"{"type":"mystery"}"#).is_empty());
        assert_eq!(m.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_legacy_events_are_delivered_normalized() {
        let mut m = ready_machine();
        let effects = m.on_frame(r#"{"type":"clip_updated","clip_id":"kick","new_code":"s(\"bd\")"}"#);
        assert_eq!(delivered(&effects), vec!["item_updated"]);
    }

    #[test]
    fn test_backoff_doubles_and_errors_after_max_failed_retries() {
        let mut m = ready_machine();

        let effects = m.on_transport_closed(None);
        assert!(effects.contains(&Effect::StateChanged(ConnectionState::Reconnecting)));
        assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_millis(1_000))));
        assert!(m.snapshot().disconnected_at.is_some());

        let mut delays = vec![1_000];
        for _ in 0..4 {
            m.on_reconnect_due();
            let effects = m.on_transport_failed("refused");
            let delay = effects.iter().find_map(|e| match e {
                Effect::ScheduleReconnect(d) => Some(d.as_millis() as u64),
                _ => None,
            });
            delays.push(delay.unwrap());
        }
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        // fifth failed retry exhausts the budget
        m.on_reconnect_due();
        let effects = m.on_transport_failed("refused");
        assert!(effects.contains(&Effect::StateChanged(ConnectionState::Error)));
        assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleReconnect(_))));
        assert_eq!(m.state(), ConnectionState::Error);
        assert_eq!(m.snapshot().last_error.as_deref(), Some("refused"));

        // no automatic retry from error
        assert!(m.on_reconnect_due().is_empty());

        // manual connect resets the counter
        m.connect();
        assert_eq!(m.snapshot().reconnect_attempt, 0);
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_successful_handshake_resets_attempts() {
        let mut m = ready_machine();
        m.on_transport_closed(None);
        m.on_reconnect_due();
        m.on_transport_failed("refused");
        assert_eq!(m.snapshot().reconnect_attempt, 2);

        m.on_reconnect_due();
        m.on_transport_open();
        m.on_frame(&ack(SESSION));
        assert_eq!(m.snapshot().reconnect_attempt, 0);
        assert!(m.snapshot().last_error.is_none());
    }

    #[test]
    fn test_disconnect_keeps_queue_and_does_not_retry() {
        let mut m = ready_machine();
        m.disconnect();
        assert_eq!(m.state(), ConnectionState::Disconnected);

        m.send(chat("later"));
        assert_eq!(m.queued(), 1);

        // a late close from the old link changes nothing
        assert!(m.on_transport_closed(None).is_empty());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_open_after_disconnect_closes_transport() {
        let mut m = machine();
        m.connect();
        m.disconnect();
        assert_eq!(m.on_transport_open(), vec![Effect::CloseTransport]);
    }

    #[test]
    fn test_keepalive_only_while_ready() {
        let mut m = machine();
        assert!(m.on_keepalive_tick().is_empty());
        m.connect();
        m.on_transport_open();
        assert!(m.on_keepalive_tick().is_empty());

        let mut m = ready_machine();
        let effects = m.on_keepalive_tick();
        assert_eq!(transmitted(&effects), vec![OutboundMessage::Keepalive {}]);
        assert!(effects.contains(&Effect::ArmDeadline(Duration::from_secs(10))));

        let effects = m.on_frame(r#"{"type":"keepalive_ack"}"#);
        assert_eq!(effects, vec![Effect::DisarmDeadline]);

        // leaving ready stops the keepalive
        let effects = m.on_transport_closed(None);
        assert!(effects.contains(&Effect::StopKeepalive));
    }

    #[test]
    fn test_deadlines_drive_reconnect() {
        let mut m = machine();
        m.connect();
        m.on_transport_open();
        let effects = m.on_deadline_elapsed();
        assert!(effects.contains(&Effect::StateChanged(ConnectionState::Reconnecting)));
        assert_eq!(m.snapshot().last_error.as_deref(), Some("handshake timed out"));

        let mut m = ready_machine();
        m.on_keepalive_tick();
        m.on_deadline_elapsed();
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert_eq!(m.snapshot().last_error.as_deref(), Some("keepalive timed out"));

        // a deadline with nothing outstanding is ignored
        let mut m = ready_machine();
        assert!(m.on_deadline_elapsed().is_empty());
    }

    #[test]
    fn test_interrupted_flush_requeues_user_messages_in_order() {
        let mut m = ready_machine();
        let effects = m.on_transmit_failed(
            vec![chat("one"), OutboundMessage::Keepalive {}, chat("two")],
            "writer closed",
        );

        assert!(effects.contains(&Effect::StateChanged(ConnectionState::Reconnecting)));
        assert_eq!(m.queued(), 2);

        m.on_reconnect_due();
        m.on_transport_open();
        let effects = m.on_frame(&ack(SESSION));
        assert_eq!(transmitted(&effects), vec![chat("one"), chat("two")]);
    }

    #[test]
    fn test_server_error_is_recorded_and_delivered() {
        let mut m = ready_machine();
        let effects = m.on_frame(r#"{"type":"error","message":"agent crashed"}"#);
        assert_eq!(delivered(&effects), vec!["error"]);
        assert_eq!(m.snapshot().last_error.as_deref(), Some("agent crashed"));
    }
}
