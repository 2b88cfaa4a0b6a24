//! Long-lived subscription to a SignalR hub event, with automatic reconnect.

pub mod negotiate;
pub mod protocol;

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::watch,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use self::{
    negotiate::Endpoint,
    protocol::{HubMessage, ProtocolError},
};
use crate::config::Config;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Terminated,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid hub url: {0}")]
    InvalidUrl(String),
    #[error("negotiation request failed: {0}")]
    Negotiate(#[source] reqwest::Error),
    #[error("server refused negotiation: {0}")]
    NegotiateRejected(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[source] ProtocolError),
    #[error("no handshake response within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,
    #[error("server closed the connection: {0}")]
    ServerClosed(String),
}

/// Callbacks invoked by [`HubConnection`].
///
/// `on_message` is awaited before the next record is read, so messages of one
/// session are handled one at a time and in arrival order.
#[async_trait]
pub trait HubHandler: Send + Sync {
    async fn on_connect(&self) {}

    async fn on_disconnect(&self) {}

    async fn on_error(&self, _error: &TransportError) {}

    /// Arguments of one invocation of the subscribed event.
    async fn on_message(&self, arguments: Vec<Value>);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Pause between two connection attempts.
    pub interval: Duration,
    /// Failed attempts after which the exhaustion is logged and the count
    /// starts over.
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub base_url: String,
    pub hub_path: String,
    pub token: String,
    pub event: String,
    pub skip_negotiation: bool,
    pub keep_alive: Duration,
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl HubOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.host.clone(),
            hub_path: config.hub_path.clone(),
            token: config.token.clone(),
            event: config.hub_event.clone(),
            skip_negotiation: config.skip_negotiation,
            keep_alive: config.keep_alive(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            reconnect: ReconnectPolicy {
                interval: config.reconnect_interval(),
                max_attempts: config.max_reconnect_attempts.max(1),
            },
        }
    }
}

enum SessionEnd {
    Stopped,
    Closed,
    Failed(TransportError),
}

pub struct HubConnection {
    options: HubOptions,
    hub_url: Url,
    http: Client,
    state: watch::Sender<ConnectionState>,
}

impl HubConnection {
    pub fn new(options: HubOptions) -> Result<Self, TransportError> {
        let raw = format!(
            "{}/{}",
            options.base_url.trim_end_matches('/'),
            options.hub_path.trim_matches('/')
        );
        let mut hub_url = Url::parse(&raw).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))?;
        hub_url.query_pairs_mut().append_pair("token", &options.token);

        let http = Client::builder()
            .timeout(NEGOTIATE_TIMEOUT)
            .build()
            .map_err(TransportError::Negotiate)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self { options, hub_url, http, state })
    }

    /// Follow connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Hub connection state changed");
        }
    }

    /// Drive the subscription until `shutdown` turns `true` (or its sender is
    /// dropped). Connection failures never end this loop.
    pub async fn run<H>(&self, handler: &H, mut shutdown: watch::Receiver<bool>)
    where
        H: HubHandler + ?Sized,
    {
        let policy = self.options.reconnect;
        let mut failed_attempts: u32 = 0;
        self.set_state(ConnectionState::Connecting);
        info!(
            host = %self.hub_url.host_str().unwrap_or_default(),
            hub = %self.options.hub_path,
            event = %self.options.event,
            "Connecting to sensor hub"
        );

        loop {
            let attempt = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                res = self.connect() => res,
            };

            match attempt {
                Ok((ws, pending)) => {
                    failed_attempts = 0;
                    self.set_state(ConnectionState::Connected);
                    info!("Hub connection opened");
                    handler.on_connect().await;

                    match self.pump(ws, pending, handler, &mut shutdown).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Closed => {
                            info!("Hub connection closed");
                            handler.on_disconnect().await;
                        }
                        SessionEnd::Failed(err) => {
                            warn!(error = %err, "Hub connection lost");
                            handler.on_error(&err).await;
                            handler.on_disconnect().await;
                        }
                    }
                }
                Err(err) => {
                    failed_attempts += 1;
                    warn!(
                        error = %err,
                        attempt = failed_attempts,
                        max_attempts = policy.max_attempts,
                        "Hub connection attempt failed"
                    );
                    handler.on_error(&err).await;
                    if failed_attempts >= policy.max_attempts {
                        error!(
                            attempts = failed_attempts,
                            "Reconnect attempts exhausted; starting a new round"
                        );
                        failed_attempts = 0;
                    }
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                _ = time::sleep(policy.interval) => {}
            }
        }

        self.set_state(ConnectionState::Terminated);
        info!("Hub connection terminated");
    }

    /// Open the WebSocket and complete the protocol handshake. Records that
    /// arrived in the same frame as the handshake answer are returned.
    async fn connect(&self) -> Result<(WsStream, Vec<HubMessage>), TransportError> {
        let endpoint = if self.options.skip_negotiation {
            Endpoint {
                url: negotiate::websocket_url(self.hub_url.clone())?,
                access_token: None,
            }
        } else {
            negotiate::negotiate(&self.http, &self.hub_url).await?
        };

        let mut request = endpoint.url.as_str().into_client_request()?;
        if let Some(token) = endpoint.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| TransportError::InvalidUrl("access token is not a valid header".into()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut ws, _) = connect_async(request).await?;
        ws.send(Message::Text(protocol::handshake_request().into())).await?;

        let timeout = self.options.handshake_timeout;
        let pending = time::timeout(timeout, read_handshake(&mut ws))
            .await
            .map_err(|_| TransportError::HandshakeTimeout(timeout))??;
        Ok((ws, pending))
    }

    async fn pump<H>(
        &self,
        mut ws: WsStream,
        pending: Vec<HubMessage>,
        handler: &H,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd
    where
        H: HubHandler + ?Sized,
    {
        for message in pending {
            if let Some(end) = self.handle(message, handler).await {
                if let Err(e) = ws.close(None).await {
                    debug!(error = %e, "Close frame could not be sent");
                }
                return end;
            }
        }

        let keep_alive = self.options.keep_alive.max(Duration::from_millis(10));
        let mut ping = time::interval_at(Instant::now() + keep_alive, keep_alive);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut *shutdown) => {
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "Close frame could not be sent");
                    }
                    return SessionEnd::Stopped;
                }
                _ = ping.tick() => {
                    if let Err(e) = ws.send(Message::Text(protocol::ping_record().into())).await {
                        return SessionEnd::Failed(e.into());
                    }
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        for record in protocol::split_records(&text) {
                            match protocol::parse_record(record) {
                                Ok(message) => {
                                    if let Some(end) = self.handle(message, handler).await {
                                        if let Err(e) = ws.close(None).await {
                                            debug!(error = %e, "Close frame could not be sent");
                                        }
                                        return end;
                                    }
                                }
                                Err(e) => warn!(error = %e, "Skipping unreadable hub record"),
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                    // Binary payloads are not part of the JSON protocol; control
                    // frames are answered by tungstenite itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Failed(e.into()),
                },
            }
        }
    }

    /// Returns `Some` when the record ends the session.
    async fn handle<H>(&self, message: HubMessage, handler: &H) -> Option<SessionEnd>
    where
        H: HubHandler + ?Sized,
    {
        match message {
            HubMessage::Invocation { target, arguments } if target == self.options.event => {
                handler.on_message(arguments).await;
                None
            }
            HubMessage::Invocation { target, .. } => {
                debug!(target = %target, "Ignoring invocation of an unsubscribed event");
                None
            }
            HubMessage::Ping => None,
            HubMessage::Close { error, allow_reconnect } => {
                if !allow_reconnect {
                    warn!("Server asked clients not to reconnect; reconnect policy still applies");
                }
                Some(match error {
                    Some(reason) => SessionEnd::Failed(TransportError::ServerClosed(reason)),
                    None => SessionEnd::Closed,
                })
            }
            HubMessage::Other(kind) => {
                debug!(kind, "Ignoring hub record");
                None
            }
        }
    }
}

async fn read_handshake(ws: &mut WsStream) -> Result<Vec<HubMessage>, TransportError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let mut records = protocol::split_records(&text);
                let Some(first) = records.next() else {
                    continue;
                };
                protocol::parse_handshake(first).map_err(TransportError::Handshake)?;

                let pending = records
                    .filter_map(|record| match protocol::parse_record(record) {
                        Ok(message) => Some(message),
                        Err(e) => {
                            warn!(error = %e, "Skipping unreadable hub record");
                            None
                        }
                    })
                    .collect();
                return Ok(pending);
            }
            Some(Ok(Message::Close(_))) | None => return Err(TransportError::ClosedDuringHandshake),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Resolves once a stop is requested or the stop sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
