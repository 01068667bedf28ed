//! Runtime-independent transport core
//!
//! [`Transport`] composes the connection state machine, inbound router,
//! connectivity broadcaster, reconnect policy and outbound gateway behind a
//! single transition function:
//!
//! ```text
//!   Event ──► Transport::handle ──► Vec<Command>
//! ```
//!
//! Events are caller requests, socket reports and timer ticks. Commands are
//! the I/O a driver must perform. The core never blocks, never spawns and
//! never looks at a clock, so every behavior can be exercised by feeding it a
//! scripted sequence of events. [`crate::client`] is the tokio driver.

use crate::config::TransportConfig;
use crate::connection::{
    Command, ConnectionManager, ConnectionStatus, SocketEvent, SocketId, SocketOutcome,
};
use crate::endpoint::ResolvedEndpoint;
use crate::error::{ApplicationError, ConnectivityError, TransportError};
use crate::gateway::{DropReason, OutboundGateway, SendOutcome};
use crate::metrics::{
    CONNECTION_FAILURES, CONNECTION_STATUS, FRAMES_RECEIVED, RECONNECT_ATTEMPTS,
    RECONNECT_EXHAUSTED,
};
use crate::reconnect::{CloseReaction, ReconnectDecision, ReconnectPolicy, ReconnectStats};
use crate::router::{Delivery, MessageRouter};
use crate::status::StatusBroadcaster;
use crate::subscription::{Fanout, Subscription};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::*;

/// Input to the transport core
#[derive(Debug)]
pub enum Event {
    /// Explicit connect request
    Connect(ResolvedEndpoint),
    /// Explicit disconnect request
    Disconnect,
    /// Outbound message
    Send { tag: String, message: Value },
    /// Report from an underlying socket
    Socket { socket: SocketId, event: SocketEvent },
    /// Reconnect timer fired
    Tick,
    /// Register a subscriber in order with the other events
    Attach(Attach),
}

/// Subscriber registration carried through the event queue
#[derive(Debug)]
pub struct Attach {
    kind: AttachKind,
}

#[derive(Debug)]
enum AttachKind {
    Tag(String, mpsc::UnboundedSender<Value>),
    Errors(mpsc::UnboundedSender<ApplicationError>),
    Status(mpsc::UnboundedSender<bool>),
    Notices(mpsc::UnboundedSender<Notice>),
}

impl Attach {
    pub(crate) fn tag(tag: String, sender: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            kind: AttachKind::Tag(tag, sender),
        }
    }

    pub(crate) fn errors(sender: mpsc::UnboundedSender<ApplicationError>) -> Self {
        Self {
            kind: AttachKind::Errors(sender),
        }
    }

    pub(crate) fn status(sender: mpsc::UnboundedSender<bool>) -> Self {
        Self {
            kind: AttachKind::Status(sender),
        }
    }

    pub(crate) fn notices(sender: mpsc::UnboundedSender<Notice>) -> Self {
        Self {
            kind: AttachKind::Notices(sender),
        }
    }
}

/// Local signal about something the transport did or could not do
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Outbound message discarded
    SendDropped { tag: String, reason: DropReason },
    /// Connection failed to open or went away unplanned
    ConnectionFailed { error: ConnectivityError },
    /// Reconnect timer started
    ReconnectScheduled { interval: Duration, max_attempts: u32 },
    /// A reconnect attempt is being made
    ReconnectAttempt { attempt: u32, max_attempts: u32 },
    /// No further automatic reconnects until the next explicit connect
    ReconnectExhausted { attempts: u32 },
    /// Inbound frame was not a valid envelope
    MalformedFrame { reason: String },
}

impl Notice {
    /// Error view of the notice, if it represents one
    pub fn as_error(&self) -> Option<TransportError> {
        match self {
            Notice::ConnectionFailed { error } => Some(error.clone().into()),
            Notice::ReconnectExhausted { attempts } => Some(TransportError::ReconnectExhausted {
                attempts: *attempts,
            }),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Transport {
    connection: ConnectionManager,
    router: MessageRouter,
    status: StatusBroadcaster,
    reconnect: ReconnectPolicy,
    gateway: OutboundGateway,
    notices: Fanout<Notice>,
}

impl Transport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            connection: ConnectionManager::new(),
            router: MessageRouter::new(),
            status: StatusBroadcaster::new(),
            reconnect: ReconnectPolicy::new(config.reconnect.clone()),
            gateway: OutboundGateway::new(),
            notices: Fanout::default(),
        }
    }

    /// Apply one event and return the I/O it requires
    pub fn handle(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::Connect(endpoint) => self.connect(endpoint),
            Event::Disconnect => self.disconnect(),
            Event::Send { tag, message } => self.send(&tag, message),
            Event::Socket { socket, event } => self.on_socket_event(socket, event),
            Event::Tick => self.on_tick(),
            Event::Attach(attach) => {
                self.attach(attach);
                Vec::new()
            }
        }
    }

    pub fn on(&mut self, tag: impl Into<String>) -> Subscription<Value> {
        self.router.on(tag)
    }

    pub fn on_error(&mut self) -> Subscription<ApplicationError> {
        self.router.on_error()
    }

    pub fn status_changes(&mut self) -> Subscription<bool> {
        self.status.subscribe()
    }

    pub fn notices(&mut self) -> Subscription<Notice> {
        self.notices.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn reconnect_stats(&self) -> &ReconnectStats {
        self.reconnect.stats()
    }

    pub(crate) fn connectivity(&self) -> watch::Receiver<bool> {
        self.status.watch()
    }

    fn attach(&mut self, attach: Attach) {
        match attach.kind {
            AttachKind::Tag(tag, sender) => self.router.attach_tag(tag, sender),
            AttachKind::Errors(sender) => self.router.attach_errors(sender),
            AttachKind::Status(sender) => self.status.attach(sender),
            AttachKind::Notices(sender) => self.notices.attach(sender),
        }
    }

    fn connect(&mut self, endpoint: ResolvedEndpoint) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.reconnect.cancel() {
            commands.push(Command::StopTimer);
        }
        info!("Connecting to {endpoint}");
        commands.extend(self.connection.connect(endpoint));
        self.publish_status();
        commands
    }

    fn disconnect(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.reconnect.cancel() {
            commands.push(Command::StopTimer);
        }
        commands.extend(self.connection.disconnect());
        self.publish_status();
        commands
    }

    fn send(&mut self, tag: &str, message: Value) -> Vec<Command> {
        match self.gateway.send(&self.connection, tag, message) {
            SendOutcome::Transmitted(command) => vec![command],
            SendOutcome::Dropped(reason) => {
                self.notify(Notice::SendDropped {
                    tag: tag.to_string(),
                    reason,
                });
                Vec::new()
            }
        }
    }

    fn on_socket_event(&mut self, socket: SocketId, event: SocketEvent) -> Vec<Command> {
        match self.connection.on_socket_event(socket, event) {
            SocketOutcome::Stale | SocketOutcome::Ignored => Vec::new(),
            SocketOutcome::Opened => {
                self.publish_status();
                if self.reconnect.on_open() {
                    vec![Command::StopTimer]
                } else {
                    Vec::new()
                }
            }
            SocketOutcome::Frame(frame) => {
                self.route(&frame);
                Vec::new()
            }
            SocketOutcome::Closed { error } => {
                self.publish_status();
                CONNECTION_FAILURES
                    .with_label_values(&[failure_kind(&error)])
                    .inc();
                self.notify(Notice::ConnectionFailed { error });
                self.on_unplanned_close()
            }
        }
    }

    fn on_unplanned_close(&mut self) -> Vec<Command> {
        match self.reconnect.on_unplanned_close() {
            CloseReaction::Schedule { interval } => {
                self.notify(Notice::ReconnectScheduled {
                    interval,
                    max_attempts: self.reconnect.config().max_attempts,
                });
                vec![Command::StartTimer { interval }]
            }
            CloseReaction::Retry { attempt } => {
                debug!("Reconnect attempt {attempt} failed");
                Vec::new()
            }
            CloseReaction::GiveUp { reason } => {
                RECONNECT_EXHAUSTED.inc();
                self.notify(Notice::ReconnectExhausted {
                    attempts: reason.attempts(),
                });
                Vec::new()
            }
            CloseReaction::Ignored => Vec::new(),
        }
    }

    fn on_tick(&mut self) -> Vec<Command> {
        match self.reconnect.on_tick(self.connection.status().is_open()) {
            ReconnectDecision::Skip => Vec::new(),
            ReconnectDecision::Attempt {
                attempt,
                max_attempts,
                last,
            } => {
                RECONNECT_ATTEMPTS.inc();
                info!("Reconnect attempt {attempt}/{max_attempts}");
                self.notify(Notice::ReconnectAttempt {
                    attempt,
                    max_attempts,
                });

                let mut commands = Vec::new();
                if last {
                    commands.push(Command::StopTimer);
                }
                commands.extend(self.connection.reconnect());
                self.publish_status();
                commands
            }
        }
    }

    fn route(&mut self, frame: &str) {
        match self.router.dispatch_frame(frame) {
            Ok(Delivery::Message { .. }) => FRAMES_RECEIVED.with_label_values(&["message"]).inc(),
            Ok(Delivery::Error { .. }) => FRAMES_RECEIVED.with_label_values(&["error"]).inc(),
            Err(err) => {
                FRAMES_RECEIVED.with_label_values(&["malformed"]).inc();
                warn!("Dropping inbound frame: {err}");
                self.notify(Notice::MalformedFrame {
                    reason: err.to_string(),
                });
            }
        }
    }

    fn publish_status(&mut self) {
        if let Some(connected) = self.status.publish(self.connection.status()) {
            CONNECTION_STATUS.set(i64::from(connected));
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.publish(notice);
    }
}

fn failure_kind(error: &ConnectivityError) -> &'static str {
    match error {
        ConnectivityError::ConnectFailed { .. } => "connect_failed",
        ConnectivityError::ConnectionLost { .. } => "connection_lost",
        ConnectivityError::ClosedByPeer { .. } => "closed_by_peer",
    }
}
