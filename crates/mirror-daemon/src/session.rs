//! Authenticated DDP session.
//!
//! A `Session` owns the connection, the local mirror of every subscribed
//! collection and the synchronizer that projects lists onto files. It is
//! created by `authenticate` and then fed one server frame at a time.

use crate::connection::DdpConnection;
use mirror_core::fs::FileSystem;
use mirror_core::model::{PRIVATE_LISTS_SUB, TODOS_SUB};
use mirror_core::protocol::{ClientMessage, DdpError, ServerMessage};
use mirror_core::{Followup, ListSynchronizer, LocalMirror};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Server rejected DDP version {requested} (it suggests {suggested})")]
    VersionRejected { requested: String, suggested: String },

    #[error("Login rejected: {0}")]
    LoginRejected(DdpError),

    #[error("Connection closed during {0}")]
    Closed(&'static str),

    #[error("Failed to send {0}: {1}")]
    Send(&'static str, String),
}

/// Connection settings for `Session::authenticate`.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub ddp_version: String,
}

/// One authenticated DDP session and the mirror it maintains.
pub struct Session<F: FileSystem> {
    connection: DdpConnection,
    /// Server-assigned DDP session id
    session_id: String,
    /// Id of the logged-in user, when the login result carried one
    user_id: Option<String>,
    mirror: LocalMirror,
    synchronizer: ListSynchronizer<F>,
    /// Counter for method and subscription ids
    next_id: u64,
    /// Subscription id -> human readable description, until ready
    pending_subs: HashMap<String, String>,
    /// Frames received during the login exchange, replayed by `start`
    backlog: VecDeque<ServerMessage>,
}

impl<F: FileSystem> Session<F> {
    /// Connect to the DDP server and log in with a resume token.
    ///
    /// Fails on connection errors, version mismatch or login rejection.
    /// Nothing is retried.
    pub async fn authenticate(
        endpoint: &Endpoint,
        login_token: &str,
        synchronizer: ListSynchronizer<F>,
    ) -> Result<Self, AuthError> {
        let mut connection =
            DdpConnection::open(&endpoint.url)
                .await
                .map_err(|e| AuthError::Connect {
                    url: endpoint.url.clone(),
                    reason: e.to_string(),
                })?;

        connection
            .send(&ClientMessage::connect(&endpoint.ddp_version))
            .await
            .map_err(|e| AuthError::Send("connect", e.to_string()))?;

        let session_id = loop {
            match connection.recv().await {
                Some(ServerMessage::Connected { session }) => break session,
                Some(ServerMessage::Failed { version }) => {
                    return Err(AuthError::VersionRejected {
                        requested: endpoint.ddp_version.clone(),
                        suggested: version,
                    });
                }
                Some(other) => debug!("Ignoring {:?} before connected", other),
                None => return Err(AuthError::Closed("connect")),
            }
        };
        debug!("DDP session {} established with {}", session_id, endpoint.url);

        let mut session = Self {
            connection,
            session_id,
            user_id: None,
            mirror: LocalMirror::new(),
            synchronizer,
            next_id: 1,
            pending_subs: HashMap::new(),
            backlog: VecDeque::new(),
        };

        let login_id = session.allocate_id();
        session
            .connection
            .send(&ClientMessage::login(&login_id, login_token))
            .await
            .map_err(|e| AuthError::Send("login", e.to_string()))?;

        loop {
            match session.connection.recv().await {
                Some(ServerMessage::MethodResult { id, result, error }) if id == login_id => {
                    if let Some(error) = error {
                        return Err(AuthError::LoginRejected(error));
                    }
                    session.user_id = result
                        .as_ref()
                        .and_then(|r| r.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    break;
                }
                Some(other) => session.backlog.push_back(other),
                None => return Err(AuthError::Closed("login")),
            }
        }

        info!(
            "Logged in as {} (session {})",
            session.user_id.as_deref().unwrap_or("<unknown user>"),
            session.session_id
        );
        Ok(session)
    }

    /// Replay frames buffered during login and subscribe to the user's lists.
    pub async fn start(&mut self) {
        while let Some(msg) = self.backlog.pop_front() {
            self.on_message(msg).await;
        }
        self.subscribe(PRIVATE_LISTS_SUB, Vec::new(), "private lists".to_string())
            .await;
    }

    /// Wait for the next frame. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.connection.recv().await
    }

    /// Handle one server frame.
    pub async fn on_message(&mut self, msg: ServerMessage) {
        if msg.is_data() {
            let Some(event) = self.mirror.apply(&msg) else {
                return;
            };
            debug!(
                "{}",
                serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event))
            );
            let followups = self.synchronizer.handle(&self.mirror, &event).await;
            for followup in followups {
                self.on_followup(followup).await;
            }
            return;
        }

        match msg {
            ServerMessage::Ready { subs } => {
                for id in subs {
                    match self.pending_subs.remove(&id) {
                        Some(what) => info!("Subscription to {} complete", what),
                        None => debug!("Subscription {} ready", id),
                    }
                }
            }
            ServerMessage::Nosub { id, error } => {
                let what = self.pending_subs.remove(&id).unwrap_or(id);
                match error {
                    Some(error) => error!("Subscription to {} failed: {}", what, error),
                    None => info!("Subscription to {} stopped", what),
                }
            }
            ServerMessage::MethodResult {
                id,
                error: Some(error),
                ..
            } => {
                error!("Method call {} failed: {}", id, error);
            }
            ServerMessage::ProtocolError { reason, .. } => {
                error!("Server reported protocol error: {}", reason);
            }
            other => debug!("Ignoring {:?}", other),
        }
    }

    async fn on_followup(&mut self, followup: Followup) {
        match followup {
            Followup::SubscribeTodos { list_id } => {
                let what = format!("todos of list {}", list_id);
                self.subscribe(TODOS_SUB, vec![Value::String(list_id)], what)
                    .await;
            }
        }
    }

    async fn subscribe(&mut self, name: &str, params: Vec<Value>, what: String) {
        let id = self.allocate_id();
        let msg = ClientMessage::Sub {
            id: id.clone(),
            name: name.to_string(),
            params,
        };
        match self.connection.send(&msg).await {
            Ok(()) => {
                debug!("Subscribing to {} (sub {})", what, id);
                self.pending_subs.insert(id, what);
            }
            Err(e) => error!("Failed to subscribe to {}: {}", what, e),
        }
    }

    fn allocate_id(&mut self) -> String {
        let id = self.next_id.to_string();
        self.next_id += 1;
        id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    /// Close the underlying connection.
    pub async fn close(&mut self) {
        self.connection.close().await;
    }
}
