//! Connection lifecycle state machine
//!
//! [`ConnectionManager`] owns the single underlying connection. It never
//! performs I/O itself: every transition returns the [`Command`]s a driver has
//! to execute, and every socket report is fed back in as a [`SocketEvent`]
//! tagged with the [`SocketId`] it came from.
//!
//! Each connect allocates a fresh `SocketId` and forgets the previous one, so
//! reports from a replaced socket (a late close, a frame still in flight) are
//! recognised as stale and have no effect. This is what keeps at most one
//! live connection per manager even when a reconnect tick and a manual
//! connect race each other.

use crate::endpoint::ResolvedEndpoint;
use crate::error::ConnectivityError;
use std::fmt;
use std::time::Duration;
use tracing::*;

/// Lifecycle status of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionStatus {
    pub fn is_open(self) -> bool {
        self == ConnectionStatus::Open
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closing => "closing",
            ConnectionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one underlying socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// What an underlying socket reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Handshake completed
    Opened,
    /// Inbound text frame
    Frame(String),
    /// Peer closed the socket
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// Socket failed to open or broke
    Failed { reason: String },
}

/// I/O the driver has to carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Dial a new socket
    Open {
        socket: SocketId,
        endpoint: ResolvedEndpoint,
    },
    /// Forcibly close a socket, discarding it even if still connecting
    Close { socket: SocketId },
    /// Write one frame
    Transmit { socket: SocketId, frame: String },
    /// Start the periodic reconnect timer
    StartTimer { interval: Duration },
    /// Stop the periodic reconnect timer
    StopTimer,
}

/// Result of feeding a socket report into the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOutcome {
    /// Report from a socket that is no longer current
    Stale,
    /// Report that does not apply to the current status
    Ignored,
    Opened,
    Frame(String),
    /// Current socket went away without being asked to
    Closed { error: ConnectivityError },
}

#[derive(Debug)]
pub struct ConnectionManager {
    status: ConnectionStatus,
    endpoint: Option<ResolvedEndpoint>,
    socket: Option<SocketId>,
    next_socket: u64,
    closed_intentionally: bool,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            endpoint: None,
            socket: None,
            next_socket: 0,
            closed_intentionally: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Last endpoint passed to `connect`
    pub fn endpoint(&self) -> Option<&ResolvedEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    pub fn closed_intentionally(&self) -> bool {
        self.closed_intentionally
    }

    /// Start a new underlying connection, tearing down any existing one first
    pub fn connect(&mut self, endpoint: ResolvedEndpoint) -> Vec<Command> {
        let mut commands = self.teardown();

        self.next_socket += 1;
        let socket = SocketId(self.next_socket);
        debug!("Opening {socket} to {endpoint}");

        self.socket = Some(socket);
        self.endpoint = Some(endpoint.clone());
        self.status = ConnectionStatus::Connecting;
        self.closed_intentionally = false;

        commands.push(Command::Open { socket, endpoint });
        commands
    }

    /// Connect again to the last endpoint
    pub fn reconnect(&mut self) -> Vec<Command> {
        match self.endpoint.clone() {
            Some(endpoint) => self.connect(endpoint),
            None => {
                warn!("Reconnect requested before any endpoint was configured");
                Vec::new()
            }
        }
    }

    /// Close the connection on purpose
    pub fn disconnect(&mut self) -> Vec<Command> {
        self.closed_intentionally = true;
        self.status = ConnectionStatus::Closing;
        let commands = self.teardown();
        self.status = ConnectionStatus::Closed;
        if let Some(endpoint) = &self.endpoint {
            info!("Disconnected from {endpoint}");
        }
        commands
    }

    fn teardown(&mut self) -> Vec<Command> {
        match self.socket.take() {
            Some(socket) => {
                debug!("Tearing down {socket} ({})", self.status);
                vec![Command::Close { socket }]
            }
            None => Vec::new(),
        }
    }

    /// Frame write for the current socket, only while open
    pub fn transmit(&self, frame: String) -> Option<Command> {
        match (self.status, self.socket) {
            (ConnectionStatus::Open, Some(socket)) => Some(Command::Transmit { socket, frame }),
            _ => None,
        }
    }

    pub fn on_socket_event(&mut self, socket: SocketId, event: SocketEvent) -> SocketOutcome {
        if self.socket != Some(socket) {
            trace!("Ignoring {event:?} from stale {socket}");
            return SocketOutcome::Stale;
        }

        match event {
            SocketEvent::Opened => {
                if self.status != ConnectionStatus::Connecting {
                    return SocketOutcome::Ignored;
                }
                self.status = ConnectionStatus::Open;
                info!("Connected to {}", self.endpoint_str());
                SocketOutcome::Opened
            }
            SocketEvent::Frame(frame) => {
                if self.status != ConnectionStatus::Open {
                    return SocketOutcome::Ignored;
                }
                SocketOutcome::Frame(frame)
            }
            SocketEvent::Closed { code, reason } => {
                let was_open = self.status == ConnectionStatus::Open;
                let endpoint = self.endpoint_str();
                let error = if was_open {
                    ConnectivityError::ClosedByPeer {
                        endpoint,
                        code,
                        reason,
                    }
                } else {
                    ConnectivityError::ConnectFailed {
                        endpoint,
                        reason: describe_close(code, reason.as_deref()),
                    }
                };
                self.lose_socket(error)
            }
            SocketEvent::Failed { reason } => {
                let endpoint = self.endpoint_str();
                let error = if self.status == ConnectionStatus::Open {
                    ConnectivityError::ConnectionLost { endpoint, reason }
                } else {
                    ConnectivityError::ConnectFailed { endpoint, reason }
                };
                self.lose_socket(error)
            }
        }
    }

    fn lose_socket(&mut self, error: ConnectivityError) -> SocketOutcome {
        warn!("Websocket closed: {error}");
        self.socket = None;
        self.status = ConnectionStatus::Closed;
        SocketOutcome::Closed { error }
    }

    fn endpoint_str(&self) -> String {
        self.endpoint
            .as_ref()
            .map(|endpoint| endpoint.to_string())
            .unwrap_or_default()
    }
}

fn describe_close(code: Option<u16>, reason: Option<&str>) -> String {
    match (code, reason) {
        (Some(code), Some(reason)) if !reason.is_empty() => format!("closed with {code}: {reason}"),
        (Some(code), _) => format!("closed with {code}"),
        _ => "closed before opening".to_string(),
    }
}
