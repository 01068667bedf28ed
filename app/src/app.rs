use crate::session::{parse_user_name, Session};
use clap::Parser;
use eyre::{eyre, Result};
use futures::pin_mut;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::*;
use tracing_subscriber::{prelude::*, EnvFilter};
use wsmux::{Client, Endpoint, EndpointParts, Notice, TransportConfig};

#[inline]
pub fn run() -> Result<()> {
    App::parse().run()
}

#[derive(Parser)]
#[command(author, about = "Tag-multiplexed websocket client", long_about = None)]
pub struct App {
    /// Complete connection string, e.g. ws://localhost:8080/game
    #[arg(long, env = "WSMUX_URL")]
    pub url: Option<String>,

    #[arg(long, default_value = "ws")]
    pub scheme: String,

    /// Defaults to the configured default host
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long, env = "WSMUX_PORT", required_unless_present = "url")]
    pub port: Option<u16>,

    #[arg(long, default_value = "")]
    pub path: String,

    /// Appended to the endpoint path, e.g. a game id
    #[arg(long)]
    pub subpath: Option<String>,

    /// Transport configuration file (toml or json)
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "WSMUX_DEFAULT_HOST")]
    pub default_host: Option<String>,

    #[arg(long, env = "WSMUX_RECONNECT_INTERVAL_MS")]
    pub reconnect_interval_ms: Option<u64>,

    #[arg(long, env = "WSMUX_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,

    /// Identify with this name after every connect
    #[arg(long, env = "WSMUX_USER_NAME", value_parser = parse_user_name)]
    pub user_name: Option<String>,

    /// Print payloads received for this tag (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    #[arg(
        long = "full-log-context",
        env = "FULL_LOG_CONTEXT",
        default_value_t = false
    )]
    pub full_log_context: bool,

    /// Print transport metrics on exit
    #[arg(long, default_value_t = false)]
    pub print_metrics: bool,
}

impl App {
    pub fn run(self) -> Result<()> {
        self.init_tracing();
        let print_metrics = self.print_metrics;
        let tokio_runtime = tokio_runtime()?;
        tokio_runtime.block_on(run_until_ctrl_c(self.execute()))?;
        if print_metrics {
            print!("{}", wsmux::metrics::gather());
        }
        Ok(())
    }

    fn init_tracing(&self) {
        let rust_log_level = Level::from_str(
            std::env::var("RUST_LOG")
                .unwrap_or("info".to_string())
                .as_str(),
        )
        .unwrap_or(Level::INFO);

        let filter = if self.full_log_context {
            EnvFilter::builder().parse_lossy(rust_log_level.as_str())
        } else {
            let filter_tag = format!("app={rust_log_level},wsmux={rust_log_level}");
            EnvFilter::builder().parse_lossy(filter_tag.as_str())
        };

        let main_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);

        let layers = if rust_log_level == Level::DEBUG || rust_log_level == Level::TRACE {
            vec![main_layer
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter)
                .boxed()]
        } else {
            vec![main_layer.with_filter(filter).boxed()]
        };

        tracing_subscriber::registry().with(layers).init();
    }

    async fn transport_config(&self) -> Result<TransportConfig> {
        let mut config = match &self.config_path {
            Some(path) => TransportConfig::load_from_file(path).await?,
            None => TransportConfig::default(),
        };

        if let Some(default_host) = &self.default_host {
            config.default_host = default_host.clone();
        }
        if let Some(interval_ms) = self.reconnect_interval_ms {
            config.reconnect.interval_ms = interval_ms;
        }
        if let Some(max_attempts) = self.max_reconnect_attempts {
            config.reconnect.max_attempts = max_attempts;
        }
        config.validate()?;
        Ok(config)
    }

    fn endpoint(&self) -> Result<Endpoint> {
        let endpoint = match (&self.url, self.port) {
            (Some(url), _) => Endpoint::from(url.as_str()),
            (None, Some(port)) => Endpoint::from(EndpointParts {
                scheme: self.scheme.clone(),
                host: self.host.clone(),
                port,
                path: self.path.clone(),
                subpath: None,
            }),
            (None, None) => return Err(eyre!("Either --url or --port is required")),
        };
        Ok(match &self.subpath {
            Some(subpath) => endpoint.with_subpath(subpath.as_str()),
            None => endpoint,
        })
    }

    async fn execute(self) -> Result<()> {
        let config = self.transport_config().await?;
        let endpoint = self.endpoint()?;
        let (client, _driver) = Client::websocket(config)?;

        let mut notices = client.notices();
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                log_notice(&notice);
            }
        });

        for tag in &self.tags {
            let mut payloads = client.on(tag.as_str());
            let tag = tag.clone();
            tokio::spawn(async move {
                while let Some(payload) = payloads.recv().await {
                    println!("{tag} {payload}");
                }
            });
        }

        let session = self
            .user_name
            .map(|user_name| tokio::spawn(Session::new(client.clone(), user_name).run()));

        client.connect(endpoint)?;

        let session_ended = async {
            match session {
                Some(session) => session.await?,
                None => std::future::pending::<Result<()>>().await,
            }
        };

        tokio::select! {
            res = forward_stdin(&client) => res?,
            res = session_ended => res?,
        }

        client.disconnect();
        // let the driver tear the socket down before the runtime goes away
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
}

/// Send every `tag json` line read from stdin until EOF
async fn forward_stdin(client: &Client) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_outbound(&line) {
            Ok(Some((tag, message))) => client.send_value(tag, message),
            Ok(None) => {}
            Err(err) => warn!("Ignoring input line: {err}"),
        }
    }
    debug!("stdin closed");
    Ok(())
}

fn parse_outbound(line: &str) -> Result<Option<(String, Value)>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (tag, body) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let message = match body.trim() {
        "" => Value::Null,
        body => serde_json::from_str(body)?,
    };
    Ok(Some((tag.to_string(), message)))
}

fn log_notice(notice: &Notice) {
    match notice {
        Notice::SendDropped { tag, reason } => warn!("Message for {tag} not sent: {reason}"),
        Notice::ConnectionFailed { error } => warn!("{error}"),
        Notice::ReconnectScheduled {
            interval,
            max_attempts,
        } => info!("Reconnecting every {interval:?}, at most {max_attempts} times"),
        Notice::ReconnectAttempt {
            attempt,
            max_attempts,
        } => info!("Reconnect attempt {attempt}/{max_attempts}"),
        Notice::ReconnectExhausted { attempts } => {
            error!("Gave up reconnecting after {attempts} attempts")
        }
        Notice::MalformedFrame { reason } => warn!("Malformed frame: {reason}"),
    }
}

pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
}

async fn run_until_ctrl_c<F, E>(fut: F) -> Result<(), E>
where
    F: Future<Output = Result<(), E>>,
    E: Send + Sync + 'static + From<std::io::Error>,
{
    let ctrl_c = tokio::signal::ctrl_c();

    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let sigterm = stream.recv();
    pin_mut!(sigterm, ctrl_c, fut);

    tokio::select! {
        _ = ctrl_c => {
            info!("Received ctrl-c");
        },
        _ = sigterm => {
            info!("Received SIGTERM");
        },
        res = fut => res?,
    }

    Ok(())
}
