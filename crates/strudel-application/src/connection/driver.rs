//! Async driver for the connection machine.
//!
//! One task owns the machine, the open link, and every timer. Callers talk to
//! it through a [`ConnectionHandle`]; state is published on a `watch` channel
//! and inbound messages on an mpsc channel.

use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use strudel_core::config::SyncConfig;
use strudel_core::connection::{ConnectionSnapshot, ConnectionState};
use strudel_core::protocol::{InboundMessage, OutboundMessage};
use strudel_core::transport::{Connector, TransportEvent, TransportLink};
use strudel_core::{Result, SyncError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::machine::{ConnectionMachine, Effect};

/// Requests accepted by the driver task.
#[derive(Debug)]
pub enum ConnectionCommand {
    Connect,
    Disconnect,
    Send(OutboundMessage),
    Shutdown,
}

/// What the driver reports to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Inbound(InboundMessage),
    StateChanged(ConnectionState),
}

/// Cloneable handle to a running connection driver.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<ConnectionCommand>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionHandle {
    /// Builds a handle over channels owned by some other driver.
    pub fn from_parts(
        commands: mpsc::UnboundedSender<ConnectionCommand>,
        snapshot: watch::Receiver<ConnectionSnapshot>,
    ) -> Self {
        Self { commands, snapshot }
    }

    pub fn connect(&self) -> Result<()> {
        self.command(ConnectionCommand::Connect)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.command(ConnectionCommand::Disconnect)
    }

    /// Sends now if ready, otherwise queues until the next handshake.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ConnectionClosed` only when the driver task has
    /// stopped. Transport problems never surface here.
    pub fn send(&self, message: OutboundMessage) -> Result<()> {
        self.command(ConnectionCommand::Send(message))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.command(ConnectionCommand::Shutdown)
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// A receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    fn command(&self, command: ConnectionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ConnectionClosed)
    }
}

/// Spawns the driver task.
///
/// # Returns
///
/// The handle, the receiver for inbound messages and state changes, and the
/// task's join handle. The task exits on `shutdown()` or once every handle is
/// dropped.
pub fn spawn(
    connector: Arc<dyn Connector>,
    config: &SyncConfig,
) -> (
    ConnectionHandle,
    mpsc::UnboundedReceiver<ConnectionEvent>,
    JoinHandle<()>,
) {
    let session_id = config
        .client_session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let machine = ConnectionMachine::new(session_id, config);

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let driver = ConnectionDriver {
        connector,
        machine,
        commands: command_rx,
        snapshot: snapshot_tx,
        events: event_tx,
        link: None,
        connecting: None,
        reconnect_at: None,
        deadline_at: None,
        keepalive: None,
    };
    let task = tokio::spawn(driver.run());

    let handle = ConnectionHandle {
        commands: command_tx,
        snapshot: snapshot_rx,
    };
    (handle, event_rx, task)
}

enum Input {
    Command(Option<ConnectionCommand>),
    Opened(Result<TransportLink>),
    Transport(Option<TransportEvent>),
    ReconnectDue,
    DeadlineElapsed,
    KeepaliveTick,
}

struct ConnectionDriver {
    connector: Arc<dyn Connector>,
    machine: ConnectionMachine,
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    link: Option<TransportLink>,
    connecting: Option<BoxFuture<'static, Result<TransportLink>>>,
    reconnect_at: Option<Instant>,
    deadline_at: Option<Instant>,
    keepalive: Option<Interval>,
}

impl ConnectionDriver {
    async fn run(mut self) {
        tracing::debug!("[ConnectionDriver] Started");
        loop {
            let input = tokio::select! {
                command = self.commands.recv() => Input::Command(command),
                opened = wait_connecting(&mut self.connecting) => Input::Opened(opened),
                event = recv_link(&mut self.link) => Input::Transport(event),
                _ = sleep_until_opt(self.reconnect_at) => Input::ReconnectDue,
                _ = sleep_until_opt(self.deadline_at) => Input::DeadlineElapsed,
                _ = tick_opt(&mut self.keepalive) => Input::KeepaliveTick,
            };

            let effects = match input {
                Input::Command(None) | Input::Command(Some(ConnectionCommand::Shutdown)) => break,
                Input::Command(Some(ConnectionCommand::Connect)) => self.machine.connect(),
                Input::Command(Some(ConnectionCommand::Disconnect)) => self.machine.disconnect(),
                Input::Command(Some(ConnectionCommand::Send(message))) => {
                    self.machine.send(message)
                }
                Input::Opened(result) => {
                    self.connecting = None;
                    match result {
                        Ok(link) => {
                            self.link = Some(link);
                            self.machine.on_transport_open()
                        }
                        Err(e) => self.machine.on_transport_failed(e.to_string()),
                    }
                }
                Input::Transport(Some(TransportEvent::Frame(text))) => self.machine.on_frame(&text),
                Input::Transport(Some(TransportEvent::Closed { reason })) => {
                    self.link = None;
                    self.machine.on_transport_closed(reason)
                }
                Input::Transport(None) => {
                    self.link = None;
                    self.machine.on_transport_closed(None)
                }
                Input::ReconnectDue => {
                    self.reconnect_at = None;
                    self.machine.on_reconnect_due()
                }
                Input::DeadlineElapsed => {
                    self.deadline_at = None;
                    self.machine.on_deadline_elapsed()
                }
                Input::KeepaliveTick => self.machine.on_keepalive_tick(),
            };

            self.apply(effects);
        }

        self.link = None;
        self.connecting = None;
        tracing::debug!("[ConnectionDriver] Stopped");
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut work: VecDeque<Effect> = effects.into();

        while let Some(effect) = work.pop_front() {
            match effect {
                Effect::OpenTransport => {
                    self.link = None;
                    let connector = Arc::clone(&self.connector);
                    self.connecting = Some(Box::pin(async move { connector.connect().await }));
                }
                Effect::CloseTransport => {
                    self.connecting = None;
                    self.link = None;
                }
                Effect::Transmit(message) => {
                    if let Err(reason) = self.transmit(&message) {
                        let mut unsent = vec![message];
                        let mut deliveries = VecDeque::new();
                        for pending_effect in work.drain(..) {
                            match pending_effect {
                                Effect::Transmit(m) => unsent.push(m),
                                Effect::Deliver(m) => deliveries.push_back(Effect::Deliver(m)),
                                _ => {}
                            }
                        }
                        self.link = None;
                        work = deliveries;
                        work.extend(self.machine.on_transmit_failed(unsent, reason));
                    }
                }
                Effect::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Effect::CancelReconnect => self.reconnect_at = None,
                Effect::StartKeepalive(period) => self.keepalive = Some(keepalive_interval(period)),
                Effect::StopKeepalive => self.keepalive = None,
                Effect::ArmDeadline(timeout) => self.deadline_at = Some(Instant::now() + timeout),
                Effect::DisarmDeadline => self.deadline_at = None,
                Effect::Deliver(message) => {
                    // the engine may already be gone during shutdown
                    let _ = self.events.send(ConnectionEvent::Inbound(message));
                }
                Effect::StateChanged(state) => {
                    let _ = self.events.send(ConnectionEvent::StateChanged(state));
                }
            }
        }

        self.snapshot.send_replace(self.machine.snapshot());
    }

    fn transmit(&self, message: &OutboundMessage) -> std::result::Result<(), String> {
        let frame = message.encode().map_err(|e| e.to_string())?;
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| "no open transport".to_string())?;
        link.send(frame)?;
        tracing::debug!("[ConnectionDriver] Sent {}", message.kind());
        Ok(())
    }
}

fn keepalive_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn wait_connecting(
    connecting: &mut Option<BoxFuture<'static, Result<TransportLink>>>,
) -> Result<TransportLink> {
    match connecting {
        Some(future) => future.as_mut().await,
        None => pending().await,
    }
}

async fn recv_link(link: &mut Option<TransportLink>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
