//! DDP client connection.
//!
//! Wraps the WebSocket to the todos app, handling the split between read and
//! write halves. A read task parses frames, answers heartbeats and forwards
//! everything else to the session over a channel.

use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use mirror_core::protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = Arc<Mutex<futures::stream::SplitSink<WsStream, Message>>>;

/// Event emitted by the read task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A parsed DDP frame (heartbeats excluded)
    Message(ServerMessage),
    /// The connection was closed
    Closed,
}

/// A single WebSocket connection to the DDP server.
pub struct DdpConnection {
    /// Endpoint we connected to
    pub url: String,
    /// Write half of the WebSocket (shared with the read task for pongs)
    write: WsWrite,
    /// Handle to the read task
    read_task: Option<JoinHandle<()>>,
    /// Frames forwarded by the read task
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl DdpConnection {
    /// Open the WebSocket and start the read task.
    ///
    /// No DDP frame is sent yet; the caller performs the `connect` handshake.
    pub async fn open(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (write, read) = ws_stream.split();
        let write = Arc::new(Mutex::new(write));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let read_url = url.to_string();
        let read_write = Arc::clone(&write);
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_url, read, read_write, event_tx).await;
        });

        Ok(Self {
            url: url.to_string(),
            write,
            read_task: Some(read_task),
            event_rx,
        })
    }

    /// Read loop that forwards frames to the event channel.
    async fn read_loop(
        url: String,
        mut read: futures::stream::SplitStream<WsStream>,
        write: WsWrite,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let text = match msg {
                        Message::Text(text) => text.to_string(),
                        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!("Dropping non-UTF-8 binary frame from {}", url);
                                continue;
                            }
                        },
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", url);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    let msg = match ServerMessage::from_json(&text) {
                        Ok(Some(msg)) => msg,
                        Ok(None) => {
                            debug!("Ignoring untagged frame from {}: {}", url, text);
                            continue;
                        }
                        Err(e) => {
                            warn!("{} from {}", e, url);
                            continue;
                        }
                    };

                    // Heartbeats are answered here so a busy session never times out
                    if let ServerMessage::Ping { id } = msg {
                        let pong = ClientMessage::Pong { id }.to_json();
                        if let Err(e) = write.lock().await.send(Message::Text(pong.into())).await {
                            warn!("Failed to answer ping from {}: {}", url, e);
                        }
                        continue;
                    }

                    if event_tx.send(ConnectionEvent::Message(msg)).is_err() {
                        // Receiver gone, nobody is listening anymore
                        break;
                    }
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", url);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", url, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", url);
                    break;
                }
            }
        }

        // Notify that connection is closed
        let _ = event_tx.send(ConnectionEvent::Closed);
    }

    /// Send a DDP frame as a text WebSocket message.
    pub async fn send(&self, msg: &ClientMessage) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Text(msg.to_json().into()))
            .await
            .map_err(|e| anyhow!("Failed to send {:?}: {}", msg, e))
    }

    /// Wait for the next DDP frame. Returns `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        match self.event_rx.recv().await? {
            ConnectionEvent::Message(msg) => Some(msg),
            ConnectionEvent::Closed => None,
        }
    }

    /// Close the connection gracefully.
    pub async fn close(&mut self) {
        // Send close frame
        if let Ok(mut write) = self.write.try_lock() {
            let _ = write.send(Message::Close(None)).await;
        }

        // Abort the read task
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for DdpConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
