//! Connectivity status broadcasting
//!
//! Observers see a boolean: `true` exactly while the connection is open. A
//! value is only emitted when it differs from the previous one, and new
//! observers receive changes from the moment they subscribe on.

use crate::connection::ConnectionStatus;
use crate::subscription::{Fanout, Subscription};
use tokio::sync::{mpsc, watch};
use tracing::*;

#[derive(Debug)]
pub struct StatusBroadcaster {
    level: watch::Sender<bool>,
    subscribers: Fanout<bool>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (level, _) = watch::channel(false);
        Self {
            level,
            subscribers: Fanout::default(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<bool> {
        self.subscribers.subscribe()
    }

    pub(crate) fn attach(&mut self, sender: mpsc::UnboundedSender<bool>) {
        self.subscribers.attach(sender);
    }

    /// Handle for reading the current level without going through the transport
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.level.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.level.borrow()
    }

    /// Record the connection status; returns the new value if it changed
    pub fn publish(&mut self, status: ConnectionStatus) -> Option<bool> {
        let connected = status.is_open();
        let changed = self.level.send_if_modified(|current| {
            if *current == connected {
                return false;
            }
            *current = connected;
            true
        });
        if !changed {
            return None;
        }

        debug!("Connectivity changed to {connected} ({status})");
        self.subscribers.publish(connected);
        Some(connected)
    }
}
