//! Transport: one bidirectional, message-framed push connection.
//!
//! A [`Connector`] opens a [`Link`], a pair of channels backed by a pump task
//! that owns the socket. The session never touches the socket directly, so
//! tests can substitute an in-memory connector.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use huddle_core::Credential;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Default capacity of the outbound and inbound link queues.
pub const DEFAULT_LINK_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connection lost: {0}")]
    Closed(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Closed(e.to_string())
    }
}

/// What the pump reports upward.
#[derive(Debug)]
pub enum LinkEvent {
    Frame(String),
    Closed { reason: Option<String> },
    Failed(TransportError),
}

/// An open connection. Dropping `outbound` closes the socket gracefully.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection authenticated with `credential`.
    async fn open(&self, credential: &Credential) -> Result<Link, TransportError>;
}

// ─── WebSocket connector ──────────────────────────────────────────

/// How the credential travels with the upgrade request.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AuthMode {
    /// `Authorization: Bearer <token>` header.
    #[default]
    Header,
    /// `?<param>=<token>` appended to the endpoint URL.
    Query { param: String },
}

pub struct WsConnector {
    url: String,
    auth: AuthMode,
    buffer: usize,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: AuthMode::default(),
            buffer: DEFAULT_LINK_BUFFER,
        }
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn endpoint(&self, credential: &Credential) -> String {
        match &self.auth {
            AuthMode::Header => self.url.clone(),
            AuthMode::Query { param } => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{sep}{param}={}", self.url, encode_query_value(credential.token()))
            }
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, credential: &Credential) -> Result<Link, TransportError> {
        let mut request = self
            .endpoint(credential)
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

        if self.auth == AuthMode::Header {
            let value = HeaderValue::from_str(&format!("Bearer {}", credential.token()))
                .map_err(|e| TransportError::InvalidEndpoint(format!("credential: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(url = %self.url, "transport: websocket open");

        let (out_tx, out_rx) = mpsc::channel(self.buffer);
        let (in_tx, in_rx) = mpsc::channel(self.buffer);
        tokio::spawn(pump(ws_stream, out_rx, in_tx));

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Owns the socket: forwards outbound text, reports inbound frames and the
/// end of the connection. Exits once either side is gone.
///
/// At most one inbound event waits for queue space at a time. While it
/// waits the socket is not read, but outbound text keeps flowing.
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut out_rx: mpsc::Receiver<String>,
    in_tx: mpsc::Sender<LinkEvent>,
) {
    let (mut sink, mut stream) = ws_stream.split();
    let mut pending: Option<LinkEvent> = None;

    loop {
        tokio::select! {
            outbound = out_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        let _ = in_tx.send(LinkEvent::Failed(e.into())).await;
                        return;
                    }
                }
                None => {
                    // Session dropped the link.
                    let _ = sink.send(WsMessage::Close(None)).await;
                    let _ = sink.close().await;
                    tracing::debug!("transport: closed by session");
                    return;
                }
            },
            permit = in_tx.reserve(), if pending.is_some() => {
                let Ok(permit) = permit else {
                    return;
                };
                let Some(event) = pending.take() else {
                    continue;
                };
                let terminal = !matches!(event, LinkEvent::Frame(_));
                permit.send(event);
                if terminal {
                    return;
                }
            }
            inbound = stream.next(), if pending.is_none() => {
                pending = Some(match inbound {
                    Some(Ok(WsMessage::Text(text))) => LinkEvent::Frame(text),
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => LinkEvent::Frame(text),
                        Err(_) => {
                            tracing::debug!("transport: ignoring non-utf8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(frame))) => LinkEvent::Closed {
                        reason: frame
                            .map(|f| f.reason.into_owned())
                            .filter(|r| !r.is_empty()),
                    },
                    // Ping/pong are answered by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => LinkEvent::Failed(e.into()),
                    None => LinkEvent::Closed { reason: None },
                });
            }
        }
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_query_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
