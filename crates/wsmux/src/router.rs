//! Inbound frame routing
//!
//! Decoded envelopes carrying `message` go to the subscribers of their tag, in
//! arrival order. Envelopes carrying `error` go to the error subscribers only.
//! Tags nobody listens to are dropped silently.

use crate::envelope::{Envelope, EnvelopeError, Payload};
use crate::error::ApplicationError;
use crate::subscription::{Fanout, Subscription};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::*;

#[derive(Debug, Default)]
pub struct MessageRouter {
    tags: HashMap<String, Fanout<Value>>,
    errors: Fanout<ApplicationError>,
}

/// Where a routed envelope ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Message { subscribers: usize },
    Error { subscribers: usize },
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the payloads of one tag
    pub fn on(&mut self, tag: impl Into<String>) -> Subscription<Value> {
        self.tags.entry(tag.into()).or_default().subscribe()
    }

    /// Subscribe to every error envelope
    pub fn on_error(&mut self) -> Subscription<ApplicationError> {
        self.errors.subscribe()
    }

    pub(crate) fn attach_tag(&mut self, tag: String, sender: mpsc::UnboundedSender<Value>) {
        self.tags.entry(tag).or_default().attach(sender);
    }

    pub(crate) fn attach_errors(&mut self, sender: mpsc::UnboundedSender<ApplicationError>) {
        self.errors.attach(sender);
    }

    /// Decode a text frame and route it
    pub fn dispatch_frame(&mut self, frame: &str) -> Result<Delivery, EnvelopeError> {
        self.dispatch(Envelope::decode(frame)?)
    }

    pub fn dispatch(&mut self, envelope: Envelope) -> Result<Delivery, EnvelopeError> {
        match envelope.into_payload()? {
            Payload::Message { tag, message } => {
                let subscribers = match self.tags.get_mut(&tag) {
                    Some(fanout) => fanout.publish(message),
                    None => 0,
                };
                if subscribers == 0 {
                    trace!("No subscribers for tag {tag}");
                    self.tags.remove(&tag);
                }
                Ok(Delivery::Message { subscribers })
            }
            Payload::Error(error) => {
                warn!("Error envelope received: {error}");
                Ok(Delivery::Error {
                    subscribers: self.errors.publish(error),
                })
            }
        }
    }

    /// Live subscribers of a tag
    pub fn subscriber_count(&mut self, tag: &str) -> usize {
        match self.tags.get_mut(tag) {
            Some(fanout) => {
                if fanout.is_empty() {
                    0
                } else {
                    fanout.len()
                }
            }
            None => 0,
        }
    }
}
