//! Data-plane channel to a kernel: one persistent WebSocket per query.
//!
//! The channel sends `execute_request` messages and demultiplexes the
//! inbound stream by message kind. Only `execute_reply`, `execute_result`
//! and `error` terminate an await; `stream` output and unrecognized kinds
//! are consumed and discarded. Each await is bounded by the configured
//! execute deadline so a stalled kernel surfaces as a recoverable timeout
//! instead of a permanent hang.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;
use uuid::Uuid;

use crate::config::ConnectionSettings;
use crate::error::{Error, Result};
use crate::kernel::endpoint;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Outbound wire shape ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RequestHeader {
    msg_id: String,
    username: String,
    session: String,
    msg_type: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    code: String,
    silent: bool,
}

/// One unit of code shipped to the kernel, protocol version 5.3.
#[derive(Debug, Serialize)]
pub struct ExecuteRequest {
    header: RequestHeader,
    parent_header: serde_json::Map<String, serde_json::Value>,
    metadata: serde_json::Map<String, serde_json::Value>,
    content: RequestContent,
}

impl ExecuteRequest {
    /// Fresh `msg_id` per message; `session` is stable for the socket's
    /// lifetime.
    pub fn new(session: &str, code: &str, silent: bool) -> Self {
        Self {
            header: RequestHeader {
                msg_id: Uuid::new_v4().to_string(),
                username: "user".to_string(),
                session: session.to_string(),
                msg_type: "execute_request".to_string(),
                version: "5.3".to_string(),
            },
            parent_header: serde_json::Map::new(),
            metadata: serde_json::Map::new(),
            content: RequestContent {
                code: code.to_string(),
                silent,
            },
        }
    }
}

// ── Inbound wire shape ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StreamContent {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ResultData {
    #[serde(rename = "text/plain")]
    pub text_plain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultContent {
    pub data: ResultData,
}

#[derive(Debug, Deserialize)]
pub struct ErrorContent {
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// Inbound kernel messages, discriminated by `msg_type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "msg_type")]
pub enum KernelMessage {
    #[serde(rename = "stream")]
    Stream { content: StreamContent },
    #[serde(rename = "execute_reply")]
    ExecuteReply,
    #[serde(rename = "execute_result")]
    ExecuteResult { content: ResultContent },
    #[serde(rename = "error")]
    Error { content: ErrorContent },
    #[serde(other)]
    Other,
}

// ── Channel ─────────────────────────────────────────────────────────────────

/// Resolve the channels endpoint for a kernel: same host and path prefix as
/// the control plane, with the scheme mapped onto WebSocket.
pub fn resolve_channel_url(settings: &ConnectionSettings, kernel_id: &str) -> Result<Url> {
    let mut url = endpoint(
        &settings.base_url,
        &["kernels", kernel_id, "channels"],
        &settings.token,
    )?;
    let ws_scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Config(format!(
                "unsupported base url scheme '{other}'; expected http(s) or ws(s)"
            )))
        }
    };
    url.set_scheme(ws_scheme)
        .map_err(|_| Error::Config("failed to set websocket scheme".to_string()))?;
    Ok(url)
}

/// Owns the socket for the duration of one query.
pub struct ExecutionChannel {
    ws: WsStream,
    session_id: String,
    execute_timeout: Option<Duration>,
}

impl ExecutionChannel {
    /// Open the channel for `kernel_id`. Connect failure is fatal to the
    /// query.
    pub async fn connect(settings: &ConnectionSettings, kernel_id: &str) -> Result<Self> {
        let url = resolve_channel_url(settings, kernel_id)?;
        Self::connect_url(url, settings.execute_timeout).await
    }

    /// Open the channel against an explicit endpoint. Used by fakes in
    /// tests; `connect` is the production path.
    pub async fn connect_url(url: Url, execute_timeout: Option<Duration>) -> Result<Self> {
        log::debug!("opening channel {url}");
        let (ws, _resp) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::ChannelConnect(e.to_string()))?;
        Ok(Self {
            ws,
            session_id: Uuid::new_v4().to_string(),
            execute_timeout,
        })
    }

    /// Send one execute request and read until a terminating message.
    ///
    /// Returns `Ok(None)` on `execute_reply` (the silent user-code run) and
    /// `Ok(Some(payload))` with the `text/plain` payload on
    /// `execute_result`.
    pub async fn execute(&mut self, code: &str, silent: bool) -> Result<Option<String>> {
        let request = ExecuteRequest::new(&self.session_id, code, silent);
        let payload = serde_json::to_string(&request)
            .map_err(|e| Error::ChannelConnect(format!("serialize request: {e}")))?;
        self.ws
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| Error::ChannelConnect(format!("send failed: {e}")))?;

        match self.execute_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, self.await_terminal()).await {
                Ok(result) => result,
                Err(_) => Err(Error::ChannelTimeout { elapsed: deadline }),
            },
            None => self.await_terminal().await,
        }
    }

    async fn await_terminal(&mut self) -> Result<Option<String>> {
        loop {
            let frame = match self.ws.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(Error::ChannelConnect(format!("read failed: {e}"))),
                None => {
                    return Err(Error::ChannelConnect(
                        "socket closed before a terminating message".to_string(),
                    ))
                }
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(Error::ChannelConnect(
                        "kernel closed the channel mid-execution".to_string(),
                    ))
                }
                // Ping/Pong are answered by tungstenite; binary frames do
                // not occur on this channel.
                _ => continue,
            };

            // Anything that fails to parse as a known shape is an
            // unrecognized kind and is skipped, like `Other`.
            let message = match serde_json::from_str::<KernelMessage>(text.as_str()) {
                Ok(m) => m,
                Err(e) => {
                    log::debug!("skipping unparseable channel message: {e}");
                    continue;
                }
            };

            match message {
                KernelMessage::Stream { content } => {
                    log::debug!("kernel output: {}", content.text.trim_end());
                }
                KernelMessage::ExecuteReply => return Ok(None),
                KernelMessage::ExecuteResult { content } => {
                    return Ok(content.data.text_plain);
                }
                KernelMessage::Error { content } => {
                    return Err(Error::RemoteExecution {
                        traceback: content.traceback,
                    });
                }
                KernelMessage::Other => {}
            }
        }
    }

    /// Close the socket. Always executed when the orchestrator completes,
    /// regardless of which step failed.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
