//! WebSocket endpoint for the desktop shell.
//!
//! Each shell connection is served by its own task. Path queries are answered
//! right there from a cloned resolver; login notifications are forwarded to the
//! daemon loop as `BridgeEvent`s.

use crate::message::{BridgeRequest, BridgeResponse, MAX_MESSAGE_SIZE};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use mirror_core::PathResolver;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

/// Event forwarded to the daemon loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The shell reported a login with this resume token
    LoggedIn { conn_id: String, login_token: String },
}

/// Answer a request that can be answered without the daemon loop.
///
/// Returns `None` for requests that only produce an event.
pub fn answer(resolver: &PathResolver, request: &BridgeRequest) -> Option<BridgeResponse> {
    match request {
        BridgeRequest::GetLocalPath { list_name } => Some(BridgeResponse::LocalPath {
            path: resolver.resolve(list_name).to_string_lossy().into_owned(),
        }),
        BridgeRequest::LoggedIn { .. } => None,
    }
}

/// Bridge server accepting shell connections.
pub struct BridgeServer {
    resolver: PathResolver,
    /// Counter for generating connection IDs
    next_conn_id: u64,
    /// Channel sender for bridge events
    event_tx: mpsc::UnboundedSender<BridgeEvent>,
    /// Channel receiver for bridge events
    event_rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl BridgeServer {
    pub fn new(resolver: PathResolver) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            resolver,
            next_conn_id: 1,
            event_tx,
            event_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Bridge listening on {}", listen_addr);
        Ok(listener)
    }

    /// Handle a new incoming TCP connection.
    ///
    /// The WebSocket upgrade and the request loop run on a spawned task.
    pub fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = format!("shell-{}", self.next_conn_id);
        self.next_conn_id += 1;

        let resolver = self.resolver.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    // Port probes connect and close without a handshake
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before handshake from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                    return;
                }
            };
            info!("Shell connected from {} (conn_id: {})", addr, conn_id);
            Self::serve(conn_id, ws_stream, resolver, event_tx).await;
        });
    }

    /// Request loop for one shell connection.
    async fn serve(
        conn_id: String,
        mut ws: WebSocketStream<TcpStream>,
        resolver: PathResolver,
        event_tx: mpsc::UnboundedSender<BridgeEvent>,
    ) {
        loop {
            let data = match ws.next().await {
                Some(Ok(Message::Text(text))) => text.to_string().into_bytes(),
                Some(Ok(Message::Binary(data))) => data.to_vec(),
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame from {}", conn_id);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    debug!("Connection {} closed", conn_id);
                    break;
                }
                Some(Err(e)) => {
                    error!("WebSocket error on {}: {}", conn_id, e);
                    break;
                }
            };

            if data.len() > MAX_MESSAGE_SIZE {
                warn!(
                    "Message from {} exceeds max size ({} > {}), dropping",
                    conn_id,
                    data.len(),
                    MAX_MESSAGE_SIZE
                );
                continue;
            }

            let response = match BridgeRequest::from_json(&data) {
                Ok(request) => {
                    if let BridgeRequest::LoggedIn { login_token } = &request {
                        debug!("Login notification from {}", conn_id);
                        let _ = event_tx.send(BridgeEvent::LoggedIn {
                            conn_id: conn_id.clone(),
                            login_token: login_token.clone(),
                        });
                    }
                    answer(&resolver, &request)
                }
                Err(e) => {
                    warn!("Invalid bridge request from {}: {}", conn_id, e);
                    Some(BridgeResponse::Error {
                        message: e.to_string(),
                    })
                }
            };

            if let Some(response) = response {
                if let Err(e) = ws.send(Message::Text(response.to_json().into())).await {
                    error!("Failed to reply to {}: {}", conn_id, e);
                    break;
                }
            }
        }
    }

    /// Wait for the next bridge event.
    pub async fn recv_event(&mut self) -> Option<BridgeEvent> {
        self.event_rx.recv().await
    }
}
