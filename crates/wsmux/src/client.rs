//! Cloneable client handle and the tokio driver behind it
//!
//! [`Client::spawn`] starts one driver task that owns a [`Transport`]. Every
//! handle method turns into an [`Event`] on the driver's queue, so requests,
//! socket reports and timer ticks are applied strictly one at a time. The
//! driver executes the resulting [`Command`]s: it spawns a task per socket,
//! aborts it on close, and runs the periodic reconnect timer.
//!
//! The driver stops once every `Client` handle has been dropped.

use crate::config::TransportConfig;
use crate::connection::{Command, SocketEvent, SocketId};
use crate::endpoint::{Endpoint, ResolvedEndpoint};
use crate::error::{ApplicationError, ConfigurationResult};
use crate::socket::{Connector, SocketReporter, WebSocketConnector};
use crate::subscription::{self, Subscription};
use crate::transport::{Attach, Event, Notice, Transport};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::*;

/// Handle to a running transport
#[derive(Debug, Clone)]
pub struct Client {
    events: mpsc::UnboundedSender<Event>,
    connectivity: watch::Receiver<bool>,
    default_host: String,
}

impl Client {
    /// Start a transport that dials real websockets
    pub fn websocket(config: TransportConfig) -> ConfigurationResult<(Self, JoinHandle<()>)> {
        Self::spawn(config, Arc::new(WebSocketConnector))
    }

    /// Start a transport driver on the current tokio runtime
    pub fn spawn(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
    ) -> ConfigurationResult<(Self, JoinHandle<()>)> {
        config.validate()?;

        let transport = Transport::new(&config);
        let connectivity = transport.connectivity();
        let (events, requests) = mpsc::unbounded_channel();
        let (socket_events, socket_reports) = mpsc::unbounded_channel();

        let driver = Driver {
            transport,
            connector,
            sockets: HashMap::new(),
            socket_events,
            timer: None,
        };
        let handle = tokio::spawn(driver.run(requests, socket_reports));

        let client = Self {
            events,
            connectivity,
            default_host: config.default_host,
        };
        Ok((client, handle))
    }

    /// Connect to `endpoint`, replacing any existing connection.
    ///
    /// Only a malformed endpoint is reported here; connection failures show up
    /// on [`Client::notices`] and drive the reconnect schedule.
    pub fn connect(&self, endpoint: impl Into<Endpoint>) -> ConfigurationResult<()> {
        let endpoint = endpoint.into().resolve(&self.default_host)?;
        self.connect_resolved(endpoint);
        Ok(())
    }

    pub fn connect_resolved(&self, endpoint: ResolvedEndpoint) {
        self.submit(Event::Connect(endpoint));
    }

    /// Close the connection and cancel any pending reconnect
    pub fn disconnect(&self) {
        self.submit(Event::Disconnect);
    }

    /// Fire-and-forget send; dropped with a notice unless connected
    pub fn send<T: Serialize + ?Sized>(&self, tag: impl Into<String>, message: &T) {
        let tag = tag.into();
        match serde_json::to_value(message) {
            Ok(message) => self.send_value(tag, message),
            Err(err) => warn!("Dropping outbound message for tag {tag:?}: {err}"),
        }
    }

    pub fn send_value(&self, tag: impl Into<String>, message: Value) {
        self.submit(Event::Send {
            tag: tag.into(),
            message,
        });
    }

    /// Payloads of envelopes tagged `tag`, from now on
    pub fn on(&self, tag: impl Into<String>) -> Subscription<Value> {
        let (tx, subscription) = subscription::channel();
        self.submit(Event::Attach(Attach::tag(tag.into(), tx)));
        subscription
    }

    /// Every error envelope, from now on
    pub fn on_error(&self) -> Subscription<ApplicationError> {
        let (tx, subscription) = subscription::channel();
        self.submit(Event::Attach(Attach::errors(tx)));
        subscription
    }

    /// Connectivity changes, from now on
    pub fn status_changes(&self) -> Subscription<bool> {
        let (tx, subscription) = subscription::channel();
        self.submit(Event::Attach(Attach::status(tx)));
        subscription
    }

    pub fn notices(&self) -> Subscription<Notice> {
        let (tx, subscription) = subscription::channel();
        self.submit(Event::Attach(Attach::notices(tx)));
        subscription
    }

    pub fn is_connected(&self) -> bool {
        *self.connectivity.borrow()
    }

    /// Wait until connected; `false` if the driver stopped first
    pub async fn wait_connected(&self) -> bool {
        let mut connectivity = self.connectivity.clone();
        let connected = connectivity.wait_for(|connected| *connected).await.is_ok();
        connected
    }

    fn submit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("Transport driver has stopped");
        }
    }
}

struct SocketTask {
    outbound: mpsc::UnboundedSender<String>,
    handle: JoinHandle<()>,
}

struct Driver {
    transport: Transport,
    connector: Arc<dyn Connector>,
    sockets: HashMap<SocketId, SocketTask>,
    socket_events: mpsc::UnboundedSender<(SocketId, SocketEvent)>,
    timer: Option<Interval>,
}

impl Driver {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Event>,
        mut socket_reports: mpsc::UnboundedReceiver<(SocketId, SocketEvent)>,
    ) {
        loop {
            tokio::select! {
                biased;

                request = requests.recv() => match request {
                    Some(event) => self.apply(event),
                    None => break,
                },
                Some((socket, event)) = socket_reports.recv() => {
                    // requests submitted before this report was sent go first,
                    // so a subscriber registered earlier never misses the frame
                    while let Ok(request) = requests.try_recv() {
                        self.apply(request);
                    }
                    let finished = matches!(event, SocketEvent::Closed { .. } | SocketEvent::Failed { .. });
                    self.apply(Event::Socket { socket, event });
                    if finished {
                        self.sockets.remove(&socket);
                    }
                }
                _ = next_tick(&mut self.timer) => self.apply(Event::Tick),
            }
        }

        debug!("All client handles dropped, shutting down transport");
        for (_, task) in self.sockets.drain() {
            task.handle.abort();
        }
    }

    fn apply(&mut self, event: Event) {
        for command in self.transport.handle(event) {
            self.execute(command);
        }
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Open { socket, endpoint } => {
                let (outbound, outbound_rx) = mpsc::unbounded_channel();
                let reporter = SocketReporter::new(socket, self.socket_events.clone());
                let connector = self.connector.clone();
                let handle = tokio::spawn(async move {
                    connector.run(endpoint, outbound_rx, reporter.clone()).await;
                    // after a Closed or Failed report this one is stale and ignored
                    reporter.failed("socket task ended");
                });
                self.sockets.insert(socket, SocketTask { outbound, handle });
            }
            Command::Close { socket } => {
                if let Some(task) = self.sockets.remove(&socket) {
                    task.handle.abort();
                }
            }
            Command::Transmit { socket, frame } => match self.sockets.get(&socket) {
                Some(task) if task.outbound.send(frame).is_ok() => {}
                _ => warn!("Frame for {socket} lost, socket task is gone"),
            },
            Command::StartTimer { interval } => self.timer = Some(reconnect_timer(interval)),
            Command::StopTimer => self.timer = None,
        }
    }
}

fn reconnect_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
