//! Outbound message path
//!
//! Sends are only written while the connection is open. Anything else is
//! dropped on the spot: there is no outbound buffer, and nothing is replayed
//! after a reconnect.

use crate::connection::{Command, ConnectionManager, ConnectionStatus};
use crate::envelope::Envelope;
use crate::metrics::{FRAMES_SENT, SENDS_DROPPED};
use serde_json::Value;
use std::fmt;
use tracing::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Connection was not open
    NotOpen { status: ConnectionStatus },
    /// Envelope could not be encoded
    InvalidEnvelope { reason: String },
}

impl DropReason {
    fn label(&self) -> &'static str {
        match self {
            DropReason::NotOpen { .. } => "not_open",
            DropReason::InvalidEnvelope { .. } => "invalid_envelope",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NotOpen { status } => write!(f, "connection is {status}"),
            DropReason::InvalidEnvelope { reason } => write!(f, "invalid envelope: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Transmitted(Command),
    Dropped(DropReason),
}

#[derive(Debug, Default)]
pub struct OutboundGateway {
    sent: u64,
    dropped: u64,
}

impl OutboundGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, connection: &ConnectionManager, tag: &str, message: Value) -> SendOutcome {
        let status = connection.status();
        if !status.is_open() {
            return self.drop_send(tag, DropReason::NotOpen { status });
        }

        let frame = match Envelope::message(tag, message).encode() {
            Ok(frame) => frame,
            Err(err) => {
                return self.drop_send(
                    tag,
                    DropReason::InvalidEnvelope {
                        reason: err.to_string(),
                    },
                )
            }
        };

        match connection.transmit(frame) {
            Some(command) => {
                self.sent += 1;
                FRAMES_SENT.inc();
                trace!("Sending {tag}");
                SendOutcome::Transmitted(command)
            }
            None => self.drop_send(tag, DropReason::NotOpen { status }),
        }
    }

    fn drop_send(&mut self, tag: &str, reason: DropReason) -> SendOutcome {
        self.dropped += 1;
        SENDS_DROPPED.with_label_values(&[reason.label()]).inc();
        warn!("Dropping outbound message for tag {tag:?}: {reason}");
        SendOutcome::Dropped(reason)
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
