//! End-to-end tests for mirror-daemon.
//!
//! A scripted DDP server stands in for the todos app: it answers the
//! handshake, login and subscriptions from fixtures, and lets each test push
//! further data frames.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use mirror_core::{InMemoryFs, ListSynchronizer, PathResolver};
use mirror_daemon::{
    AuthError, BridgeResponse, Config, Daemon, Endpoint, IndexKind, NativeFs, Session,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};

const GOOD_TOKEN: &str = "resume-token-ok";
const ROOT: &str = "/home/me/Desktop/Todos";

// ============================================================================
// Scripted DDP server
// ============================================================================

/// Fake todos app speaking just enough DDP.
struct FakeDdpServer {
    url: String,
    /// Per-connection senders for frames pushed to clients, in accept order
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<Value>>>>,
    /// Frames received from any client
    incoming: mpsc::UnboundedReceiver<Value>,
    /// Client frames received but not yet expected
    seen: Vec<Value>,
}

impl FakeDdpServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let connections = Arc::new(Mutex::new(Vec::new()));
        let (incoming_tx, incoming) = mpsc::unbounded_channel();

        let registry = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
                registry.lock().unwrap().push(outgoing);
                tokio::spawn(serve_ddp(stream, outgoing_rx, incoming_tx.clone()));
            }
        });

        Self {
            url: format!("ws://{}/websocket", addr),
            connections,
            incoming,
            seen: Vec::new(),
        }
    }

    /// Number of DDP connections accepted so far.
    fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint {
            url: self.url.clone(),
            ddp_version: "1".into(),
        }
    }

    /// Send a frame to the most recent connection.
    fn push(&self, frame: Value) {
        let connections = self.connections.lock().unwrap();
        let latest = connections.last().expect("No DDP connection yet");
        latest.send(frame).expect("Connection task gone");
    }

    /// Take the oldest client frame with the given `msg`, waiting if needed.
    async fn expect(&mut self, kind: &str) -> Value {
        timeout(Duration::from_secs(2), async {
            loop {
                if let Some(pos) = self.seen.iter().position(|m| m["msg"] == kind) {
                    return self.seen.remove(pos);
                }
                let msg = self.incoming.recv().await.expect("Server task gone");
                self.seen.push(msg);
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Timeout waiting for {}", kind))
    }
}

/// Serve one DDP client: scripted replies plus frames pushed by the test.
async fn serve_ddp(
    stream: TcpStream,
    mut outgoing_rx: mpsc::UnboundedReceiver<Value>,
    incoming_tx: mpsc::UnboundedSender<Value>,
) {
    let mut ws = accept_async(stream).await.expect("Failed to upgrade");
    ws.send(Message::Text(r#"{"server_id":"0"}"#.to_string().into()))
        .await
        .unwrap();

    loop {
        tokio::select! {
            frame = ws.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(_)) => continue,
                    _ => break,
                };
                let msg: Value = serde_json::from_str(&text).unwrap();
                for reply in script(&msg) {
                    if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                }
                let _ = incoming_tx.send(msg);
            }
            Some(frame) = outgoing_rx.recv() => {
                if ws.send(Message::Text(frame.to_string().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Canned replies to client frames.
fn script(msg: &Value) -> Vec<Value> {
    match msg["msg"].as_str() {
        Some("connect") if msg["version"] == "1" => vec![
            json!({"msg": "connected", "session": "session-1"}),
            json!({"msg": "ping", "id": "hb-1"}),
        ],
        Some("connect") => vec![json!({"msg": "failed", "version": "1"})],
        Some("method") if msg["method"] == "login" => {
            let id = msg["id"].clone();
            if msg["params"][0]["resume"] == GOOD_TOKEN {
                vec![
                    json!({"msg": "added", "collection": "users", "id": "user-1", "fields": {"username": "me"}}),
                    json!({"msg": "result", "id": id, "result": {"id": "user-1", "token": GOOD_TOKEN}}),
                    json!({"msg": "updated", "methods": [id]}),
                ]
            } else {
                vec![json!({
                    "msg": "result",
                    "id": id,
                    "error": {"error": 403, "reason": "You've been logged out by the server.", "errorType": "Meteor.Error"}
                })]
            }
        }
        Some("sub") if msg["name"] == "privateLists" => vec![
            json!({"msg": "added", "collection": "lists", "id": "L1", "fields": {"name": "Groceries", "userId": "user-1"}}),
            json!({"msg": "ready", "subs": [msg["id"].clone()]}),
        ],
        Some("sub") if msg["name"] == "todos" && msg["params"][0] == "L1" => vec![
            json!({"msg": "added", "collection": "todos", "id": "T1", "fields": {"text": "milk", "listId": "L1"}}),
            json!({"msg": "added", "collection": "todos", "id": "T2", "fields": {"text": "eggs", "listId": "L1"}}),
            json!({"msg": "ready", "subs": [msg["id"].clone()]}),
        ],
        Some("sub") => vec![json!({
            "msg": "nosub",
            "id": msg["id"].clone(),
            "error": {"error": 404, "reason": "Subscription not found"}
        })],
        _ => Vec::new(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Authenticate against the fake server with an in-memory filesystem.
async fn login(server: &FakeDdpServer) -> (Session<Arc<InMemoryFs>>, Arc<InMemoryFs>) {
    let fs = Arc::new(InMemoryFs::new());
    let sync = ListSynchronizer::new(Arc::clone(&fs), PathResolver::new(ROOT));
    let mut session = Session::authenticate(&server.endpoint(), GOOD_TOKEN, sync)
        .await
        .expect("Login should succeed");
    session.start().await;
    (session, fs)
}

/// Feed frames to the session until `done` holds.
async fn pump_until(
    session: &mut Session<Arc<InMemoryFs>>,
    fs: &InMemoryFs,
    done: impl Fn(&InMemoryFs) -> bool,
) {
    timeout(Duration::from_secs(2), async {
        while !done(fs) {
            let msg = session.recv().await.expect("Connection closed");
            session.on_message(msg).await;
        }
    })
    .await
    .expect("Timeout waiting for files");
}

fn file(fs: &InMemoryFs, name: &str) -> Option<String> {
    fs.contents(&Path::new(ROOT).join(format!("{}.txt", name)))
}

// ============================================================================
// Session tests
// ============================================================================

#[tokio::test]
async fn test_login_sends_resume_token_and_subscribes() {
    let mut server = FakeDdpServer::start().await;
    let (mut session, fs) = login(&server).await;

    let connect = server.expect("connect").await;
    assert_eq!(connect["version"], "1");

    let login = server.expect("method").await;
    assert_eq!(login["method"], "login");
    assert_eq!(login["params"], json!([{"resume": GOOD_TOKEN}]));

    let pong = server.expect("pong").await;
    assert_eq!(pong["id"], "hb-1");

    let sub = server.expect("sub").await;
    assert_eq!(sub["name"], "privateLists");
    assert_eq!(sub["params"], json!([]));

    assert_eq!(session.user_id(), Some("user-1"));
    assert_eq!(session.session_id(), "session-1");
    // User document published during login was kept
    assert!(session.mirror().get("users", "user-1").is_some());

    pump_until(&mut session, &fs, |fs| file(fs, "Groceries").as_deref() == Some("milk\neggs\n")).await;

    let todos_sub = server.expect("sub").await;
    assert_eq!(todos_sub["name"], "todos");
    assert_eq!(todos_sub["params"], json!(["L1"]));
}

#[tokio::test]
async fn test_mutations_update_files() {
    let server = FakeDdpServer::start().await;
    let (mut session, fs) = login(&server).await;
    pump_until(&mut session, &fs, |fs| file(fs, "Groceries").as_deref() == Some("milk\neggs\n")).await;

    server.push(json!({"msg": "added", "collection": "todos", "id": "T3", "fields": {"text": "bread", "listId": "L1"}}));
    pump_until(&mut session, &fs, |fs| {
        file(fs, "Groceries").as_deref() == Some("milk\neggs\nbread\n")
    })
    .await;

    server.push(json!({"msg": "removed", "collection": "todos", "id": "T1"}));
    pump_until(&mut session, &fs, |fs| file(fs, "Groceries").as_deref() == Some("eggs\nbread\n")).await;

    server.push(json!({"msg": "changed", "collection": "lists", "id": "L1", "fields": {"name": "Shopping"}}));
    pump_until(&mut session, &fs, |fs| file(fs, "Shopping").is_some()).await;
    assert!(file(&fs, "Groceries").is_none());
    assert_eq!(file(&fs, "Shopping").as_deref(), Some("eggs\nbread\n"));

    server.push(json!({"msg": "removed", "collection": "lists", "id": "L1"}));
    pump_until(&mut session, &fs, |fs| fs.paths().is_empty()).await;
}

#[tokio::test]
async fn test_failed_subscription_keeps_session_alive() {
    let server = FakeDdpServer::start().await;
    let (mut session, fs) = login(&server).await;
    pump_until(&mut session, &fs, |fs| file(fs, "Groceries").is_some()).await;

    // A list whose todos publication does not exist on the server
    server.push(json!({"msg": "added", "collection": "lists", "id": "L2", "fields": {"name": "Chores"}}));
    server.push(json!({"msg": "error", "reason": "Bad request"}));
    server.push(json!({"msg": "added", "collection": "todos", "id": "T9", "fields": {"text": "sweep", "listId": "L2"}}));

    pump_until(&mut session, &fs, |fs| file(fs, "Chores").as_deref() == Some("sweep\n")).await;
}

#[tokio::test]
async fn test_write_failure_does_not_stop_session() {
    let server = FakeDdpServer::start().await;
    let (mut session, fs) = login(&server).await;
    pump_until(&mut session, &fs, |fs| file(fs, "Groceries").as_deref() == Some("milk\neggs\n")).await;

    fs.fail_next_writes(1);
    server.push(json!({"msg": "added", "collection": "todos", "id": "T3", "fields": {"text": "bread", "listId": "L1"}}));
    server.push(json!({"msg": "added", "collection": "todos", "id": "T4", "fields": {"text": "jam", "listId": "L1"}}));

    pump_until(&mut session, &fs, |fs| {
        file(fs, "Groceries").as_deref() == Some("milk\neggs\nbread\njam\n")
    })
    .await;
}

#[tokio::test]
async fn test_login_rejected() {
    let server = FakeDdpServer::start().await;
    let sync = ListSynchronizer::new(Arc::new(InMemoryFs::new()), PathResolver::new(ROOT));

    let result = Session::authenticate(&server.endpoint(), "expired-token", sync).await;

    match result {
        Err(AuthError::LoginRejected(error)) => assert_eq!(error.error, json!(403)),
        Err(other) => panic!("Expected LoginRejected, got {}", other),
        Ok(_) => panic!("Expected LoginRejected, got a session"),
    }
}

#[tokio::test]
async fn test_version_rejected() {
    let server = FakeDdpServer::start().await;
    let sync = ListSynchronizer::new(Arc::new(InMemoryFs::new()), PathResolver::new(ROOT));
    let endpoint = Endpoint {
        url: server.url.clone(),
        ddp_version: "pre1".into(),
    };

    let result = Session::authenticate(&endpoint, GOOD_TOKEN, sync).await;
    assert!(matches!(result, Err(AuthError::VersionRejected { .. })));
}

#[tokio::test]
async fn test_connect_failure() {
    // Bind then drop to get a port nobody listens on
    let addr: SocketAddr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let endpoint = Endpoint {
        url: format!("ws://{}/websocket", addr),
        ddp_version: "1".into(),
    };
    let sync = ListSynchronizer::new(Arc::new(InMemoryFs::new()), PathResolver::new(ROOT));

    let result = Session::authenticate(&endpoint, GOOD_TOKEN, sync).await;
    assert!(matches!(result, Err(AuthError::Connect { .. })));
}

// ============================================================================
// Daemon tests (bridge + session + native filesystem)
// ============================================================================

/// Minimal desktop shell talking to the bridge.
async fn shell_request(addr: SocketAddr, frames: &[Value]) -> Vec<BridgeResponse> {
    let (mut ws, _) = connect_async(format!("ws://{}", addr))
        .await
        .expect("Failed to connect to bridge");
    let mut responses = Vec::new();
    for frame in frames {
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        if frame["type"] == "loggedIn" {
            continue;
        }
        let reply = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timeout waiting for reply")
            .expect("Bridge closed")
            .expect("WebSocket error");
        let text = match reply {
            Message::Text(text) => text.to_string(),
            other => panic!("Unexpected frame {:?}", other),
        };
        responses.push(serde_json::from_str(&text).unwrap());
    }
    let _ = ws.close(None).await;
    responses
}

async fn wait_for_file(path: &Path, expected: &str) {
    timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                if content == expected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Timeout waiting for {}", path.display()));
}

#[tokio::test]
async fn test_daemon_mirrors_after_shell_login() {
    let server = FakeDdpServer::start().await;
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("Todos");

    let config = Config {
        root: root.clone(),
        ddp_url: server.url.clone(),
        ddp_version: "1".into(),
        listen: "127.0.0.1:0".into(),
        index: IndexKind::ByList,
    };
    let listener = TcpListener::bind(&config.listen).await.unwrap();
    let bridge_addr = listener.local_addr().unwrap();

    let mut daemon = Daemon::new(config, NativeFs::new());
    daemon.bootstrap().await;
    assert!(root.is_dir(), "Root directory should be created");

    let (done_tx, done_rx) = oneshot::channel::<()>();
    let shell_root = root.clone();
    let shell = tokio::spawn(async move {
        // Path queries work before any login
        let responses = shell_request(
            bridge_addr,
            &[
                json!({"type": "getLocalPath", "listName": "My List"}),
                json!({"type": "bogus"}),
            ],
        )
        .await;
        assert_eq!(
            responses[0],
            BridgeResponse::LocalPath {
                path: format!("{}/My List.txt", shell_root.display())
            }
        );
        assert!(matches!(responses[1], BridgeResponse::Error { .. }));

        shell_request(
            bridge_addr,
            &[json!({"type": "loggedIn", "loginToken": GOOD_TOKEN})],
        )
        .await;

        wait_for_file(&shell_root.join("Groceries.txt"), "milk\neggs\n").await;

        server.push(json!({"msg": "changed", "collection": "todos", "id": "T2", "fields": {"text": "free-range eggs"}}));
        wait_for_file(&shell_root.join("Groceries.txt"), "milk\nfree-range eggs\n").await;

        let _ = done_tx.send(());
        server
    });

    daemon
        .run(listener, async {
            let _ = done_rx.await;
        })
        .await;

    let _server = shell.await.expect("Shell task failed");
    assert!(daemon.session().is_some());
}

#[tokio::test]
async fn test_daemon_survives_rejected_login() {
    let server = FakeDdpServer::start().await;
    let dir = TempDir::new().unwrap();

    let config = Config {
        root: dir.path().to_path_buf(),
        ddp_url: server.url.clone(),
        ddp_version: "1".into(),
        listen: "127.0.0.1:0".into(),
        index: IndexKind::FullScan,
    };
    let listener = TcpListener::bind(&config.listen).await.unwrap();
    let bridge_addr = listener.local_addr().unwrap();
    let mut daemon = Daemon::new(config, NativeFs::new());

    let (done_tx, done_rx) = oneshot::channel::<()>();
    let shell = tokio::spawn(async move {
        shell_request(
            bridge_addr,
            &[json!({"type": "loggedIn", "loginToken": "expired-token"})],
        )
        .await;
        // Give the daemon time to attempt the login
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Still answering queries afterwards
        let responses = shell_request(
            bridge_addr,
            &[json!({"type": "getLocalPath", "listName": "Groceries"})],
        )
        .await;
        assert!(matches!(responses[0], BridgeResponse::LocalPath { .. }));

        let _ = done_tx.send(());
        server
    });

    daemon
        .run(listener, async {
            let _ = done_rx.await;
        })
        .await;

    let _server = shell.await.expect("Shell task failed");
    assert!(daemon.session().is_none());
}

fn daemon_config(root: &Path, ddp_url: String) -> Config {
    Config {
        root: root.to_path_buf(),
        ddp_url,
        ddp_version: "1".into(),
        listen: "127.0.0.1:0".into(),
        index: IndexKind::FullScan,
    }
}

#[tokio::test]
async fn test_hung_ddp_endpoint_does_not_block_bridge() {
    // Accepts TCP but never completes the WebSocket upgrade
    let hung = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let hung_addr = hung.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = hung.accept().await {
            held.push(stream);
        }
    });

    let dir = TempDir::new().unwrap();
    let config = daemon_config(dir.path(), format!("ws://{}/websocket", hung_addr));
    let listener = TcpListener::bind(&config.listen).await.unwrap();
    let bridge_addr = listener.local_addr().unwrap();
    let mut daemon = Daemon::new(config, NativeFs::new());

    let (done_tx, done_rx) = oneshot::channel::<()>();
    let shell_root = dir.path().to_path_buf();
    let shell = tokio::spawn(async move {
        shell_request(
            bridge_addr,
            &[json!({"type": "loggedIn", "loginToken": GOOD_TOKEN})],
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // A new shell connection is still accepted and answered
        let responses = timeout(
            Duration::from_secs(3),
            shell_request(
                bridge_addr,
                &[json!({"type": "getLocalPath", "listName": "Groceries"})],
            ),
        )
        .await
        .expect("Bridge blocked by pending login");
        assert_eq!(
            responses[0],
            BridgeResponse::LocalPath {
                path: format!("{}/Groceries.txt", shell_root.display())
            }
        );

        let _ = done_tx.send(());
    });

    daemon
        .run(listener, async {
            let _ = done_rx.await;
        })
        .await;

    shell.await.expect("Shell task failed");
    assert!(daemon.session().is_none());
}

#[tokio::test]
async fn test_login_after_rejected_attempt_starts_fresh() {
    let mut server = FakeDdpServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = daemon_config(dir.path(), server.url.clone());
    let listener = TcpListener::bind(&config.listen).await.unwrap();
    let bridge_addr = listener.local_addr().unwrap();
    let mut daemon = Daemon::new(config, NativeFs::new());

    let (done_tx, done_rx) = oneshot::channel::<()>();
    let shell_root = dir.path().to_path_buf();
    let shell = tokio::spawn(async move {
        shell_request(
            bridge_addr,
            &[json!({"type": "loggedIn", "loginToken": "expired-token"})],
        )
        .await;
        let rejected = server.expect("method").await;
        assert_eq!(rejected["params"][0]["resume"], "expired-token");
        // Let the daemon record the failure
        tokio::time::sleep(Duration::from_millis(200)).await;

        shell_request(
            bridge_addr,
            &[json!({"type": "loggedIn", "loginToken": GOOD_TOKEN})],
        )
        .await;
        wait_for_file(&shell_root.join("Groceries.txt"), "milk\neggs\n").await;
        assert_eq!(server.connection_count(), 2);

        let _ = done_tx.send(());
        server
    });

    daemon
        .run(listener, async {
            let _ = done_rx.await;
        })
        .await;

    let _server = shell.await.expect("Shell task failed");
    assert!(daemon.session().is_some());
}

#[tokio::test]
async fn test_second_login_is_ignored_while_logged_in() {
    let server = FakeDdpServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = daemon_config(dir.path(), server.url.clone());
    let listener = TcpListener::bind(&config.listen).await.unwrap();
    let bridge_addr = listener.local_addr().unwrap();
    let mut daemon = Daemon::new(config, NativeFs::new());

    let (done_tx, done_rx) = oneshot::channel::<()>();
    let shell_root = dir.path().to_path_buf();
    let shell = tokio::spawn(async move {
        shell_request(
            bridge_addr,
            &[json!({"type": "loggedIn", "loginToken": GOOD_TOKEN})],
        )
        .await;
        wait_for_file(&shell_root.join("Groceries.txt"), "milk\neggs\n").await;

        shell_request(
            bridge_addr,
            &[json!({"type": "loggedIn", "loginToken": "another-token"})],
        )
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.connection_count(), 1);

        let _ = done_tx.send(());
        server
    });

    daemon
        .run(listener, async {
            let _ = done_rx.await;
        })
        .await;

    let _server = shell.await.expect("Shell task failed");
    assert_eq!(daemon.session().map(|s| s.session_id()), Some("session-1"));
}
