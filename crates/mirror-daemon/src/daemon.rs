//! The daemon event loop.
//!
//! One task owns everything: the bridge server, the optional DDP session and
//! its mirror. Events are handled one at a time, so each list file is written
//! by exactly one handler at a time. Logins run on their own task and hand the
//! finished session back, so the bridge keeps answering meanwhile.

use crate::bridge::{BridgeEvent, BridgeServer};
use crate::config::Config;
use crate::native_fs::NativeFs;
use crate::session::{AuthError, Endpoint, Session};
use mirror_core::fs::FileSystem;
use mirror_core::protocol::ServerMessage;
use mirror_core::{ListSynchronizer, PathResolver};
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

type AuthResult<F> = Result<Session<F>, AuthError>;

/// Daemon state holding all components.
pub struct Daemon<F: FileSystem + Clone + 'static> {
    config: Config,
    fs: F,
    /// Bridge to the desktop shell
    bridge: BridgeServer,
    /// The DDP session, once a login succeeded
    session: Option<Session<F>>,
    /// Whether a login task is running
    login_in_flight: bool,
    /// Channel sender for login outcomes
    auth_tx: mpsc::UnboundedSender<AuthResult<F>>,
    /// Channel receiver for login outcomes
    auth_rx: mpsc::UnboundedReceiver<AuthResult<F>>,
}

impl Daemon<NativeFs> {
    /// Daemon writing to the real filesystem.
    pub fn native(config: Config) -> Self {
        Self::new(config, NativeFs::new())
    }
}

impl<F: FileSystem + Clone + 'static> Daemon<F> {
    pub fn new(config: Config, fs: F) -> Self {
        let bridge = BridgeServer::new(PathResolver::new(config.root.clone()));
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        Self {
            config,
            fs,
            bridge,
            session: None,
            login_in_flight: false,
            auth_tx,
            auth_rx,
        }
    }

    /// Create the mirror root. Failure is logged; writes will fail and be logged too.
    pub async fn bootstrap(&self) {
        match self.fs.mkdir(&self.config.root).await {
            Ok(()) => info!("Mirroring lists into {}", self.config.root.display()),
            Err(e) => error!(
                "Failed to create mirror root {}: {}",
                self.config.root.display(),
                e
            ),
        }
    }

    pub fn session(&self) -> Option<&Session<F>> {
        self.session.as_ref()
    }

    /// Handle an event from the bridge.
    pub fn on_bridge_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::LoggedIn {
                conn_id,
                login_token,
            } => {
                info!("Login reported by {}", conn_id);
                self.on_logged_in(login_token);
            }
        }
    }

    /// Start authenticating with a resume token on a separate task.
    ///
    /// Only one session exists per process; logins are ignored while one is
    /// alive or being established. A failed attempt is not retried.
    pub fn on_logged_in(&mut self, login_token: String) {
        if let Some(session) = &self.session {
            warn!(
                "Already logged in (session {}), ignoring login",
                session.session_id()
            );
            return;
        }
        if self.login_in_flight {
            warn!("Login already in progress, ignoring login");
            return;
        }

        let endpoint = Endpoint {
            url: self.config.ddp_url.clone(),
            ddp_version: self.config.ddp_version.clone(),
        };
        let synchronizer = ListSynchronizer::with_index(
            self.fs.clone(),
            PathResolver::new(self.config.root.clone()),
            self.config.index.build(),
        );

        self.login_in_flight = true;
        let auth_tx = self.auth_tx.clone();
        tokio::spawn(async move {
            let result = match Session::authenticate(&endpoint, &login_token, synchronizer).await {
                Ok(mut session) => {
                    session.start().await;
                    Ok(session)
                }
                Err(e) => Err(e),
            };
            let _ = auth_tx.send(result);
        });
    }

    /// Install the session produced by a login task.
    pub fn on_authenticated(&mut self, result: AuthResult<F>) {
        self.login_in_flight = false;
        match result {
            Ok(session) => self.session = Some(session),
            Err(e) => error!("{}", e),
        }
    }

    /// Handle a frame from the DDP session, or its end.
    pub async fn on_ddp_message(&mut self, msg: Option<ServerMessage>) {
        match msg {
            Some(msg) => {
                if let Some(session) = self.session.as_mut() {
                    session.on_message(msg).await;
                }
            }
            None => {
                warn!("DDP connection closed; list files are no longer updated");
                self.session = None;
            }
        }
    }

    /// Run until `shutdown` resolves.
    pub async fn run(&mut self, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Accept new shell connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.bridge.accept_connection(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }

                // Handle login notifications
                Some(event) = self.bridge.recv_event() => {
                    self.on_bridge_event(event);
                }

                // Handle finished logins
                Some(result) = self.auth_rx.recv() => {
                    self.on_authenticated(result);
                }

                // Handle DDP frames
                msg = next_message(&mut self.session), if self.session.is_some() => {
                    self.on_ddp_message(msg).await;
                }

                // Handle graceful shutdown
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.close().await;
        }
    }
}

async fn next_message<F: FileSystem>(session: &mut Option<Session<F>>) -> Option<ServerMessage> {
    match session {
        Some(session) => session.recv().await,
        None => std::future::pending().await,
    }
}
