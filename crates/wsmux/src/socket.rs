//! Underlying socket implementations
//!
//! A [`Connector`] runs one socket from dial to close. It reports everything
//! that happens through its [`SocketReporter`] and writes whatever arrives on
//! its outbound queue. The driver aborts the task to force a close.

use crate::connection::{SocketEvent, SocketId};
use crate::endpoint::ResolvedEndpoint;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::*;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket to `endpoint` and run it until it closes
    async fn run(
        &self,
        endpoint: ResolvedEndpoint,
        outbound: mpsc::UnboundedReceiver<String>,
        reporter: SocketReporter,
    );
}

/// Reports socket events back to the driver, tagged with the socket identity
#[derive(Debug, Clone)]
pub struct SocketReporter {
    socket: SocketId,
    events: mpsc::UnboundedSender<(SocketId, SocketEvent)>,
}

impl SocketReporter {
    pub(crate) fn new(
        socket: SocketId,
        events: mpsc::UnboundedSender<(SocketId, SocketEvent)>,
    ) -> Self {
        Self { socket, events }
    }

    pub fn socket(&self) -> SocketId {
        self.socket
    }

    pub fn opened(&self) {
        self.report(SocketEvent::Opened);
    }

    pub fn frame(&self, frame: String) {
        self.report(SocketEvent::Frame(frame));
    }

    pub fn closed(&self, code: Option<u16>, reason: Option<String>) {
        self.report(SocketEvent::Closed { code, reason });
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.report(SocketEvent::Failed {
            reason: reason.into(),
        });
    }

    fn report(&self, event: SocketEvent) {
        if self.events.send((self.socket, event)).is_err() {
            trace!("Driver gone, dropping report from {}", self.socket);
        }
    }
}

/// Websocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn run(
        &self,
        endpoint: ResolvedEndpoint,
        mut outbound: mpsc::UnboundedReceiver<String>,
        reporter: SocketReporter,
    ) {
        let stream = match connect_async(endpoint.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                debug!("Failed to open {}: {err}", reporter.socket());
                reporter.failed(err.to_string());
                return;
            }
        };
        reporter.opened();

        let (mut writer, mut reader) = stream.split();
        loop {
            tokio::select! {
                inbound = reader.next() => match inbound {
                    Some(Ok(Message::Text(text))) => reporter.frame(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => reporter.frame(text),
                        Err(_) => warn!("Dropping non UTF-8 binary frame on {}", reporter.socket()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), Some(frame.reason.into_owned())),
                            None => (None, None),
                        };
                        reporter.closed(code, reason);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        reporter.failed(err.to_string());
                        return;
                    }
                    None => {
                        reporter.closed(None, None);
                        return;
                    }
                },
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(err) = writer.send(Message::Text(frame)).await {
                            reporter.failed(err.to_string());
                            return;
                        }
                    }
                    None => {
                        if let Err(err) = writer.close().await {
                            debug!("Failed to close {}: {err}", reporter.socket());
                        }
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reporter_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = SocketReporter::new(SocketId::new(7), tx);

        reporter.opened();
        reporter.frame("x".to_string());
        reporter.closed(Some(1000), Some("bye".to_string()));

        assert_eq!(rx.recv().await, Some((SocketId::new(7), SocketEvent::Opened)));
        assert_eq!(
            rx.recv().await,
            Some((SocketId::new(7), SocketEvent::Frame("x".to_string())))
        );
        assert_eq!(
            rx.recv().await,
            Some((
                SocketId::new(7),
                SocketEvent::Closed {
                    code: Some(1000),
                    reason: Some("bye".to_string())
                }
            ))
        );
    }

    #[tokio::test]
    async fn test_dropped_outbound_queue_closes_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = socket.next().await {
                if let Message::Close(_) = message {
                    return true;
                }
            }
            false
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel::<String>();
        let endpoint = ResolvedEndpoint::parse(&format!("ws://127.0.0.1:{port}/sess")).unwrap();
        let run = tokio::spawn(async move {
            WebSocketConnector
                .run(endpoint, outbound, SocketReporter::new(SocketId::new(3), tx))
                .await
        });

        assert_eq!(rx.recv().await, Some((SocketId::new(3), SocketEvent::Opened)));
        drop(outbound_tx);
        run.await.unwrap();
        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_refused_connection_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_outbound_tx, outbound) = mpsc::unbounded_channel();
        let endpoint = ResolvedEndpoint::parse("ws://127.0.0.1:1/unreachable").unwrap();

        WebSocketConnector
            .run(endpoint, outbound, SocketReporter::new(SocketId::new(1), tx))
            .await;

        assert!(matches!(
            rx.recv().await,
            Some((_, SocketEvent::Failed { .. }))
        ));
    }
}
