//! Session identification on top of the transport
//!
//! Every time connectivity turns `true` the session sends one `auth` envelope
//! and waits for `auth-ok` or an `auth-error` error envelope. `wrong-game` and
//! `kick` end the session.

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::*;
use wsmux::{ApplicationError, Client, Subscription};

pub const AUTH_TAG: &str = "auth";
pub const AUTH_OK_TAG: &str = "auth-ok";
pub const AUTH_ERROR_TAG: &str = "auth-error";
pub const WRONG_GAME_TAG: &str = "wrong-game";
pub const KICK_TAG: &str = "kick";

const RESERVED_USER_NAME: &str = "admin";

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    user_name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthenticatedUser {
    pub user_name: String,
    pub user_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated(AuthenticatedUser),
    Terminated { reason: String },
}

/// What an error envelope means for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorOutcome {
    /// Identification rejected; the next reconnect tries again
    Rejected { reason: String },
    /// Session cannot continue
    Terminated { reason: String },
    /// Error for some other feature
    Reported { tag: String },
}

/// Clap value parser for the identification name
pub fn parse_user_name(raw: &str) -> Result<String, String> {
    let user_name = raw.trim();
    if user_name.is_empty() {
        return Err("user name cannot be empty".to_string());
    }
    if user_name.eq_ignore_ascii_case(RESERVED_USER_NAME) {
        return Err(format!("user name {user_name:?} is reserved"));
    }
    Ok(user_name.to_string())
}

#[derive(Debug)]
pub struct Session {
    client: Client,
    user_name: String,
    state: SessionState,
    status: Subscription<bool>,
    auth_ok: Subscription<Value>,
    errors: Subscription<ApplicationError>,
}

impl Session {
    /// Subscribe right away so nothing after this call is missed
    pub fn new(client: Client, user_name: String) -> Self {
        Self {
            status: client.status_changes(),
            auth_ok: client.on(AUTH_OK_TAG),
            errors: client.on_error(),
            client,
            user_name,
            state: SessionState::Anonymous,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, SessionState::Terminated { .. })
    }

    fn on_connectivity(&mut self, connected: bool) {
        if self.is_terminated() {
            return;
        }
        if !connected {
            self.state = SessionState::Anonymous;
            return;
        }
        info!("Identifying as {}", self.user_name);
        self.client.send(
            AUTH_TAG,
            &AuthRequest {
                user_name: &self.user_name,
            },
        );
        self.state = SessionState::Authenticating;
    }

    fn on_authenticated(&mut self, user: AuthenticatedUser) {
        info!("Authenticated as {} (id {})", user.user_name, user.user_id);
        self.state = SessionState::Authenticated(user);
    }

    pub fn on_error(&mut self, error: &ApplicationError) -> ErrorOutcome {
        match error.tag.as_str() {
            AUTH_ERROR_TAG => {
                error!("Identification rejected: {}", error.error);
                self.state = SessionState::Anonymous;
                ErrorOutcome::Rejected {
                    reason: error.error.clone(),
                }
            }
            WRONG_GAME_TAG | KICK_TAG => {
                let reason = match error.tag.as_str() {
                    WRONG_GAME_TAG => format!("no such game: {}", error.error),
                    _ => format!("kicked: {}", error.error),
                };
                error!("Session terminated, {reason}");
                self.state = SessionState::Terminated {
                    reason: reason.clone(),
                };
                ErrorOutcome::Terminated { reason }
            }
            tag => {
                warn!("Error for {tag}: {}", error.error);
                ErrorOutcome::Reported {
                    tag: tag.to_string(),
                }
            }
        }
    }

    /// Drive the session until it is terminated or the client stops
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                connected = self.status.recv() => match connected {
                    Some(connected) => self.on_connectivity(connected),
                    None => return Ok(()),
                },
                user = self.auth_ok.recv_as::<AuthenticatedUser>() => match user {
                    Some(Ok(user)) => self.on_authenticated(user),
                    Some(Err(err)) => warn!("Malformed {AUTH_OK_TAG} payload: {err}"),
                    None => return Ok(()),
                },
                error = self.errors.recv() => match error {
                    Some(error) => {
                        if let ErrorOutcome::Terminated { reason } = self.on_error(&error) {
                            self.client.disconnect();
                            return Err(eyre!("Session terminated: {reason}"));
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}
