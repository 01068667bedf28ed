//! Error taxonomy for the realtime transport
//!
//! Only [`ConfigurationError`] is ever returned synchronously from the public
//! API. Connectivity problems, server-sent failures and reconnect exhaustion
//! are reported asynchronously on the notice and error streams.

use serde_json::Value;
use thiserror::Error;

/// Primary error type for transport operations
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Malformed endpoint or invalid configuration
    #[error("Configuration error: {source}")]
    Configuration {
        #[from]
        source: ConfigurationError,
    },

    /// Underlying connection failure
    #[error("Connectivity error: {source}")]
    Connectivity {
        #[from]
        source: ConnectivityError,
    },

    /// Server-sent error envelope
    #[error("Application error: {source}")]
    Application {
        #[from]
        source: ApplicationError,
    },

    /// Reconnect attempts used up; no further automatic action
    #[error("Reconnect exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Configuration error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Endpoint could not be turned into a connection string
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Endpoint scheme is not a websocket scheme
    #[error("Unsupported endpoint scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    /// Invalid configuration parameter
    #[error("Invalid configuration parameter: {parameter} - {reason}")]
    InvalidParameter { parameter: String, reason: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {validation_errors:?}")]
    ValidationFailed { validation_errors: Vec<String> },

    /// Configuration file not found
    #[error("Configuration file not found: {file_path}")]
    FileNotFound { file_path: String },

    /// Configuration parse error
    #[error("Configuration parse error: {parse_error}")]
    ParseError { parse_error: String },
}

/// Connection-related error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    /// Failed to establish the connection
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// Connection lost unexpectedly
    #[error("Connection lost to {endpoint}: {reason}")]
    ConnectionLost { endpoint: String, reason: String },

    /// Peer closed the connection
    #[error("Connection to {endpoint} closed by peer (code: {code:?}, reason: {reason:?})")]
    ClosedByPeer {
        endpoint: String,
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl ConnectivityError {
    /// Endpoint the failure relates to
    pub fn endpoint(&self) -> &str {
        match self {
            ConnectivityError::ConnectFailed { endpoint, .. }
            | ConnectivityError::ConnectionLost { endpoint, .. }
            | ConnectivityError::ClosedByPeer { endpoint, .. } => endpoint,
        }
    }
}

/// Failure notification sent by the server for a specific tag
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Remote error for tag {tag}: {error}")]
pub struct ApplicationError {
    /// Tag of the feature stream the failure belongs to
    pub tag: String,
    /// Server-provided error text
    pub error: String,
    /// Optional structured detail attached by the server
    pub data: Option<Value>,
}

pub type ConfigurationResult<T> = Result<T, ConfigurationError>;
pub type TransportResult<T> = Result<T, TransportError>;
