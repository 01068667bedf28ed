//! In-memory connector for exercising the client without a network
//!
//! [`ScriptedConnector`] answers each dial with the next [`Script`] step (or
//! its fallback once the script runs out) and records when the dial happened.
//! Every socket that opens is handed to the test as a [`ScriptedLink`], which
//! plays the server side: inject frames, read what the client sent, close or
//! break the socket.

use crate::connection::SocketId;
use crate::endpoint::ResolvedEndpoint;
use crate::socket::{Connector, SocketReporter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// How a dial is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Open,
    Refuse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dial {
    pub at: Instant,
    pub endpoint: ResolvedEndpoint,
}

#[derive(Debug)]
struct ScriptState {
    steps: VecDeque<Script>,
    fallback: Script,
    dials: Vec<Dial>,
}

#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
    links: mpsc::UnboundedSender<ScriptedLink>,
}

impl ScriptedConnector {
    /// Connector answering every dial with `fallback` unless scripted otherwise
    pub fn new(fallback: Script) -> (Self, mpsc::UnboundedReceiver<ScriptedLink>) {
        let (links, links_rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(ScriptState {
                steps: VecDeque::new(),
                fallback,
                dials: Vec::new(),
            })),
            links,
        };
        (connector, links_rx)
    }

    /// Queue answers for the next dials
    pub fn script(&self, steps: impl IntoIterator<Item = Script>) {
        self.state.lock().steps.extend(steps);
    }

    pub fn set_fallback(&self, fallback: Script) {
        self.state.lock().fallback = fallback;
    }

    pub fn dials(&self) -> Vec<Dial> {
        self.state.lock().dials.clone()
    }

    pub fn dial_count(&self) -> usize {
        self.state.lock().dials.len()
    }

    fn next_step(&self, endpoint: &ResolvedEndpoint) -> Script {
        let mut state = self.state.lock();
        state.dials.push(Dial {
            at: Instant::now(),
            endpoint: endpoint.clone(),
        });
        let fallback = state.fallback;
        state.steps.pop_front().unwrap_or(fallback)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn run(
        &self,
        endpoint: ResolvedEndpoint,
        outbound: mpsc::UnboundedReceiver<String>,
        reporter: SocketReporter,
    ) {
        match self.next_step(&endpoint) {
            Script::Refuse => reporter.failed("connection refused"),
            Script::Open => {
                reporter.opened();
                let (alive, released) = oneshot::channel();
                let link = ScriptedLink {
                    endpoint,
                    reporter,
                    outbound,
                    alive,
                };
                if self.links.send(link).is_ok() {
                    // hold the socket until the link goes away or the task is aborted
                    let _ = released.await;
                }
            }
        }
    }
}

/// Server side of one scripted socket
#[derive(Debug)]
pub struct ScriptedLink {
    endpoint: ResolvedEndpoint,
    reporter: SocketReporter,
    outbound: mpsc::UnboundedReceiver<String>,
    alive: oneshot::Sender<()>,
}

impl ScriptedLink {
    pub fn endpoint(&self) -> &ResolvedEndpoint {
        &self.endpoint
    }

    pub fn socket(&self) -> SocketId {
        self.reporter.socket()
    }

    /// Deliver a text frame to the client
    pub fn push(&self, frame: impl Into<String>) {
        self.reporter.frame(frame.into());
    }

    /// Next frame the client wrote
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Frames the client wrote so far
    pub fn sent(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the client discarded this socket
    pub fn is_discarded(&self) -> bool {
        self.alive.is_closed()
    }

    /// Close from the server side
    pub fn close(self, code: Option<u16>, reason: Option<&str>) {
        self.reporter.closed(code, reason.map(str::to_string));
    }

    /// Break the socket
    pub fn fail(self, reason: &str) {
        self.reporter.failed(reason);
    }
}
