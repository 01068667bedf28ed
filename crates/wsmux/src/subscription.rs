//! Cancellable subscription handles and the fan-out they are fed from
//!
//! Each subscription owns its own unbounded queue. Dropping (or calling
//! [`Subscription::unsubscribe`] on) a handle closes that queue; the publisher
//! notices on its next delivery and forgets the subscriber. No other
//! subscriber is affected.

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Independently cancellable stream of values
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

pub(crate) fn channel<T>() -> (mpsc::UnboundedSender<T>, Subscription<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Subscription { receiver: rx })
}

impl<T> Subscription<T> {
    /// Wait for the next value; `None` once the publisher is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Next value if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::new();
        while let Ok(value) = self.receiver.try_recv() {
            values.push(value);
        }
        values
    }

    /// Stop delivery to this subscriber
    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

impl Subscription<Value> {
    /// Wait for the next payload and decode it into `T`
    pub async fn recv_as<T: DeserializeOwned>(&mut self) -> Option<Result<T, serde_json::Error>> {
        self.recv().await.map(serde_json::from_value::<T>)
    }

    /// Turn the payload stream into a stream of decoded `T`
    pub fn decode<T: DeserializeOwned>(self) -> impl Stream<Item = Result<T, serde_json::Error>> {
        self.map(serde_json::from_value::<T>)
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// Delivers every published value to all live subscribers
#[derive(Debug)]
pub(crate) struct Fanout<T> {
    senders: Vec<mpsc::UnboundedSender<T>>,
}

impl<T> Default for Fanout<T> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
        }
    }
}

impl<T: Clone> Fanout<T> {
    pub fn subscribe(&mut self) -> Subscription<T> {
        let (tx, subscription) = channel();
        self.attach(tx);
        subscription
    }

    pub fn attach(&mut self, sender: mpsc::UnboundedSender<T>) {
        self.senders.push(sender);
    }

    /// Returns the number of subscribers reached
    pub fn publish(&mut self, value: T) -> usize {
        self.senders.retain(|tx| tx.send(value.clone()).is_ok());
        self.senders.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.senders.retain(|tx| !tx.is_closed());
        self.senders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }
}
