//! Endpoint descriptors accepted by `connect`
//!
//! An endpoint is either a complete connection string or a structured
//! `{ scheme, host, port, path, subpath }` form. Both resolve to a validated
//! websocket URL before any connection attempt is made, so a malformed
//! endpoint is always reported synchronously to the caller.

use crate::error::{ConfigurationError, ConfigurationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const SUPPORTED_SCHEMES: [&str; 2] = ["ws", "wss"];

/// Endpoint descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    /// Complete connection string, e.g. `ws://localhost:8080/game`
    Url(String),
    /// Structured form
    Parts(EndpointParts),
}

/// Structured endpoint form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointParts {
    /// `ws` or `wss`; a trailing `://` is tolerated
    pub scheme: String,
    /// Falls back to the configured default host when absent
    #[serde(default)]
    pub host: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub path: String,
    /// Appended to the base path with a single separating slash
    #[serde(default)]
    pub subpath: Option<String>,
}

/// Validated endpoint, ready to be dialed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    url: Url,
}

impl Endpoint {
    /// Append a subpath to this endpoint
    pub fn with_subpath(self, subpath: impl Into<String>) -> Self {
        let subpath = subpath.into();
        match self {
            Endpoint::Url(base) => Endpoint::Url(join_subpath(&base, &subpath)),
            Endpoint::Parts(mut parts) => {
                parts.subpath = Some(match parts.subpath.take() {
                    Some(existing) => join_subpath(&existing, &subpath),
                    None => subpath,
                });
                Endpoint::Parts(parts)
            }
        }
    }

    /// Build the connection string and validate it
    pub fn resolve(&self, default_host: &str) -> ConfigurationResult<ResolvedEndpoint> {
        let raw = match self {
            Endpoint::Url(url) => url.clone(),
            Endpoint::Parts(parts) => parts.to_connection_string(default_host),
        };
        ResolvedEndpoint::parse(&raw)
    }
}

impl EndpointParts {
    fn to_connection_string(&self, default_host: &str) -> String {
        let scheme = self.scheme.trim_end_matches("://");
        let host = self
            .host
            .as_deref()
            .filter(|host| !host.is_empty())
            .unwrap_or(default_host);
        let path = if self.path.is_empty() || self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let base = format!("{scheme}://{host}:{}{path}", self.port);
        match self.subpath.as_deref() {
            Some(subpath) => join_subpath(&base, subpath),
            None => base,
        }
    }
}

fn join_subpath(base: &str, subpath: &str) -> String {
    let subpath = subpath.trim_start_matches('/');
    if subpath.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), subpath)
}

impl ResolvedEndpoint {
    pub fn parse(raw: &str) -> ConfigurationResult<Self> {
        let url = Url::parse(raw).map_err(|e| ConfigurationError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: e.to_string(),
        })?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(ConfigurationError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
            });
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigurationError::InvalidEndpoint {
                endpoint: raw.to_string(),
                reason: "missing host".to_string(),
            });
        }
        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl From<&str> for Endpoint {
    fn from(url: &str) -> Self {
        Endpoint::Url(url.to_string())
    }
}

impl From<String> for Endpoint {
    fn from(url: String) -> Self {
        Endpoint::Url(url)
    }
}

impl From<EndpointParts> for Endpoint {
    fn from(parts: EndpointParts) -> Self {
        Endpoint::Parts(parts)
    }
}
