//! Reconnecting, tag-multiplexed realtime client transport
//!
//! One websocket connection carries many logical streams. Each frame is a JSON
//! envelope naming its tag; consumers subscribe per tag, send tagged
//! messages, observe connectivity, and receive server-sent errors on a
//! dedicated stream. Unplanned closes are retried on a fixed interval up to a
//! configured number of attempts.
//!
//! The state machine lives in [`Transport`] and performs no I/O. [`Client`]
//! drives it on tokio with a pluggable [`Connector`].

pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod reconnect;
pub mod router;
pub mod socket;
pub mod status;
pub mod subscription;
pub mod testing;
pub mod transport;

// Re-exports for convenience
pub use client::Client;
pub use config::{ReconnectConfig, TransportConfig};
pub use connection::{Command, ConnectionStatus, SocketEvent, SocketId};
pub use endpoint::{Endpoint, EndpointParts, ResolvedEndpoint};
pub use envelope::{Envelope, EnvelopeError, Payload};
pub use error::*;
pub use gateway::{DropReason, SendOutcome};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectStats};
pub use socket::{Connector, SocketReporter, WebSocketConnector};
pub use subscription::Subscription;
pub use transport::{Event, Notice, Transport};
