//! Chat socket connection management.
//!
//! Owns the single live WebSocket per signed-in user:
//!
//! 1. `connect(user_id)` opens `ws(s)://<host>/chat/<user_id>/` and resolves
//!    once the socket reports open. Connecting again for the same user is a
//!    no-op; a different user tears the old socket down first.
//! 2. A writer task forwards outbound frames from an unbounded channel; a
//!    reader task parses inbound JSON frames and fans them out through the
//!    [`Dispatcher`].
//! 3. An unclean close (anything other than an explicit `disconnect()`)
//!    schedules reconnects with linear backoff, capped at a fixed attempt
//!    count. After the cap, the caller must observe the status and call
//!    `connect` again.
//!
//! The manager is a cheap-to-clone handle; clones share one connection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::{ClientFrame, ServerFrame};

/// Socket readiness, derived from the live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No socket, and none wanted (initial state, or after `disconnect()`)
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Socket open; frames flow
    Open,
    /// Explicit close in progress
    Closing,
    /// Socket dropped without an explicit `disconnect()`
    Closed,
    /// The transport reported a state this client cannot classify
    Unknown,
}

impl ConnectionStatus {
    /// Lowercase label, for logs and status indicators.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Unknown => "unknown",
        }
    }
}

/// Mutable connection state, shared by all handles.
struct ConnInner {
    /// User the socket belongs to; survives unclean closes for reconnects
    user_id: Option<String>,
    /// Bumped by every `connect`/`disconnect`; stale tasks check it and bail
    generation: u64,
    /// Outbound frame channel into the writer task
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    /// Reader task handle, aborted on teardown
    reader: Option<JoinHandle<()>>,
    /// Consecutive unclean closes without a successful open
    attempts: u32,
}

/// Manages the chat socket lifecycle and frame I/O.
#[derive(Clone)]
pub struct ConnectionManager {
    config: ChatConfig,
    dispatcher: Dispatcher,
    inner: Arc<Mutex<ConnInner>>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new(config: ChatConfig) -> Self {
        let (status_tx, _status_rx) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            config,
            dispatcher: Dispatcher::new(),
            inner: Arc::new(Mutex::new(ConnInner {
                user_id: None,
                generation: 0,
                outbound: None,
                reader: None,
                attempts: 0,
            })),
            status_tx: Arc::new(status_tx),
        }
    }

    /// The handler registry fed by this connection's reader task.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Current socket readiness.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Watch socket readiness changes (for an ambient status indicator).
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// True iff a socket exists and is open.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Open && self.inner.lock().outbound.is_some()
    }

    /// The user the connection currently belongs to.
    pub fn current_user(&self) -> Option<String> {
        self.inner.lock().user_id.clone()
    }

    /// Consecutive unclean closes since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Open the socket for `user_id`, resolving once it reports open.
    ///
    /// A no-op when already open for the same user. When open for a
    /// different user, the existing socket is torn down first. Errors if
    /// the transport fails before the socket opens; in that case no
    /// automatic retry is scheduled.
    pub async fn connect(&self, user_id: &str) -> Result<()> {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.user_id.as_deref() == Some(user_id)
                && inner.outbound.is_some()
                && self.status() == ConnectionStatus::Open
            {
                tracing::debug!(user = user_id, "Chat socket already open for this user");
                return Ok(());
            }

            // Tear down whatever exists: a different user's socket, or the
            // remains of a closed one.
            inner.generation += 1;
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
            inner.outbound = None;
            inner.user_id = Some(user_id.to_string());
            inner.attempts = 0;
            inner.generation
        };

        self.establish(user_id, generation).await
    }

    /// Close the socket and forget the user. Never triggers reconnection.
    /// Safe to call when already disconnected.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.user_id.is_none() && inner.outbound.is_none() {
            return;
        }

        self.set_status(ConnectionStatus::Closing);
        inner.generation += 1;
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }
        // Dropping the channel ends the writer task, which sends the close
        // frame on its way out.
        inner.outbound = None;
        inner.user_id = None;
        inner.attempts = 0;
        self.set_status(ConnectionStatus::Disconnected);
        tracing::info!("Chat socket disconnected");
    }

    /// Serialize and transmit a frame, only if the socket is open.
    ///
    /// When the socket is not open this logs and returns
    /// [`Error::NotConnected`] without transmitting; there is no outbound
    /// queue. Callers own any retry or input preservation.
    pub fn send_frame(&self, frame: ClientFrame) -> Result<()> {
        let inner = self.inner.lock();
        let tx = match (&inner.outbound, self.status()) {
            (Some(tx), ConnectionStatus::Open) => tx,
            _ => {
                tracing::warn!(
                    status = self.status().as_str(),
                    "Dropping outbound frame; chat socket is not open"
                );
                return Err(Error::NotConnected);
            }
        };

        let json = serde_json::to_string(&frame).map_err(|e| Error::Serialization(e.to_string()))?;
        tx.send(WsMessage::Text(json.into()))
            .map_err(|_| Error::NotConnected)
    }

    // ── Internal ────────────────────────────────────────────────────────────

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    /// Open the socket and wire up the reader/writer tasks.
    async fn establish(&self, user_id: &str, generation: u64) -> Result<()> {
        let url = self.config.ws_url(user_id);
        self.set_status(ConnectionStatus::Connecting);
        tracing::info!(user = user_id, url = url.as_str(), "Connecting chat socket...");

        let (stream, _) = match connect_async(&url).await {
            Ok(ok) => ok,
            Err(e) => {
                self.set_status(ConnectionStatus::Closed);
                return Err(Error::ConnectionFailed(e.to_string()));
            }
        };

        let socket_id = Uuid::new_v4();
        let (mut ws_sender, mut ws_receiver) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        // Writer task: forwards outbound frames until the channel closes,
        // then closes the socket.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.send(WsMessage::Close(None)).await;
        });

        // Reader task: any close observed here was not initiated by
        // disconnect() (that aborts this task), so it is unclean.
        let manager = self.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = ws_receiver.next().await {
                match msg_result {
                    Ok(WsMessage::Text(text)) => manager.handle_frame(&text),
                    Ok(WsMessage::Close(_)) => {
                        tracing::info!(socket = %socket_id, "Server sent close frame");
                        break;
                    }
                    Ok(WsMessage::Ping(_)) => {
                        // tungstenite answers pings at the protocol level
                    }
                    Err(e) => {
                        tracing::warn!(socket = %socket_id, error = %e, "Chat socket error");
                        break;
                    }
                    _ => {}
                }
            }
            manager.handle_unclean_close(generation);
        });

        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                // Superseded by a newer connect() or disconnect() while the
                // handshake was in flight.
                reader.abort();
                drop(tx);
                return Err(Error::ConnectionFailed("connection superseded".to_string()));
            }
            inner.outbound = Some(tx);
            inner.reader = Some(reader);
            inner.attempts = 0;
        }
        self.set_status(ConnectionStatus::Open);
        tracing::info!(socket = %socket_id, user = user_id, "Chat socket open");
        Ok(())
    }

    /// Parse an inbound text frame and fan it out. Malformed JSON is
    /// logged and dropped, never raised.
    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => self.dispatcher.dispatch(&frame),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed inbound frame");
            }
        }
    }

    /// React to an unclean close: schedule a linearly backed-off reconnect,
    /// or give up once the attempt cap is reached.
    fn handle_unclean_close(&self, generation: u64) {
        let (attempt, delay) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return; // stale socket; a newer connect/disconnect owns state
            }
            inner.outbound = None;
            inner.reader = None;

            if inner.attempts >= self.config.max_reconnect_attempts {
                tracing::warn!(
                    attempts = inner.attempts,
                    "Reconnect attempts exhausted; waiting for a manual connect"
                );
                self.set_status(ConnectionStatus::Closed);
                return;
            }
            inner.attempts += 1;
            (inner.attempts, self.config.reconnect_base_delay * inner.attempts)
        };
        self.set_status(ConnectionStatus::Closed);

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let user = {
                let inner = manager.inner.lock();
                if inner.generation != generation {
                    return;
                }
                inner.user_id.clone()
            };
            let Some(user) = user else { return };

            tracing::info!(attempt, user = user.as_str(), "Attempting chat reconnect");
            if let Err(e) = manager.establish(&user, generation).await {
                tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                manager.handle_unclean_close(generation);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::net::TcpListener;

    /// How the in-process test server treats each connection.
    #[derive(Clone, Copy)]
    enum ServerMode {
        /// Complete the handshake and hold the connection open, recording
        /// inbound text frames.
        Hold,
        /// Accept one connection, drop it right after the handshake, then
        /// stop listening. The client sees an unclean close and every
        /// reconnect attempt is refused.
        DropOnceThenRefuse,
        /// Send one canned `chat` frame, then hold.
        GreetThenHold,
    }

    struct TestServer {
        host: String,
        connections: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<String>>>,
    }

    async fn spawn_server(mode: ServerMode) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let conn_count = Arc::clone(&connections);
        let recv_log = Arc::clone(&received);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                conn_count.fetch_add(1, Ordering::SeqCst);

                if matches!(mode, ServerMode::DropOnceThenRefuse) {
                    // Finish the handshake so the client observes a real
                    // open, then drop everything including the listener.
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        drop(ws);
                    }
                    break;
                }

                let recv_log = Arc::clone(&recv_log);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    if matches!(mode, ServerMode::GreetThenHold) {
                        let frame = r#"{"type":"chat","message":{"id":1,"content":"hi","senderId":"peer-1","isRead":false}}"#;
                        let _ = ws.send(WsMessage::Text(frame.into())).await;
                    }
                    while let Some(Ok(msg)) = ws.next().await {
                        match msg {
                            WsMessage::Text(text) => recv_log.lock().push(text.to_string()),
                            WsMessage::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });

        TestServer {
            host,
            connections,
            received,
        }
    }

    fn test_config(host: &str) -> ChatConfig {
        ChatConfig {
            host: host.to_string(),
            use_tls: false,
            reconnect_base_delay: Duration::from_millis(20),
            ..ChatConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_for_same_user() {
        let server = spawn_server(ServerMode::Hold).await;
        let manager = ConnectionManager::new(test_config(&server.host));

        manager.connect("user-42").await.unwrap();
        manager.connect("user-42").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(server.connections.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected());
        assert_eq!(manager.status(), ConnectionStatus::Open);
        assert_eq!(manager.current_user().as_deref(), Some("user-42"));
    }

    #[tokio::test]
    async fn test_connect_for_different_user_replaces_socket() {
        let server = spawn_server(ServerMode::Hold).await;
        let manager = ConnectionManager::new(test_config(&server.host));

        manager.connect("user-42").await.unwrap();
        manager.connect("user-7").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(server.connections.load(Ordering::SeqCst), 2);
        assert_eq!(manager.current_user().as_deref(), Some("user-7"));
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_send_frame_reaches_server() {
        let server = spawn_server(ServerMode::Hold).await;
        let manager = ConnectionManager::new(test_config(&server.host));

        manager.connect("user-42").await.unwrap();
        manager
            .send_frame(ClientFrame::Test { payload: None })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let received = server.received.lock().clone();
        assert_eq!(received, vec![r#"{"type":"test"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_send_frame_while_disconnected_is_an_error() {
        let manager = ConnectionManager::new(test_config("127.0.0.1:1"));

        let result = manager.send_frame(ClientFrame::SendMessage {
            recipient_id: "peer-1".to_string(),
            message: "hello".to_string(),
        });

        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_initial_connect_failure_rejects_without_retry() {
        // Port 1 refuses connections.
        let manager = ConnectionManager::new(test_config("127.0.0.1:1"));

        let result = manager.connect("user-42").await;
        assert!(matches!(result, Err(Error::ConnectionFailed(_))));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(manager.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_inbound_frame_reaches_registered_handler() {
        let server = spawn_server(ServerMode::GreetThenHold).await;
        let manager = ConnectionManager::new(test_config(&server.host));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _guard = manager.dispatcher().register(
            crate::protocol::FrameKind::Chat,
            Arc::new(move |frame| {
                if let ServerFrame::Chat { message } = frame {
                    sink.lock().push(message.content.clone());
                }
            }),
        );

        manager.connect("user-42").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*seen.lock(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_clean_disconnect_does_not_reconnect() {
        let server = spawn_server(ServerMode::Hold).await;
        let manager = ConnectionManager::new(test_config(&server.host));

        manager.connect("user-42").await.unwrap();
        manager.disconnect();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(server.connections.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(manager.current_user(), None);

        // Disconnecting again is a no-op.
        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_unclean_close_reconnects_until_cap() {
        let server = spawn_server(ServerMode::DropOnceThenRefuse).await;
        let manager = ConnectionManager::new(test_config(&server.host));

        // The first connect succeeds, the server drops us, and every
        // linearly backed-off reconnect is refused.
        manager.connect("user-42").await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(server.connections.load(Ordering::SeqCst), 1);
        assert_eq!(manager.reconnect_attempts(), 5);
        assert_eq!(manager.status(), ConnectionStatus::Closed);

        // No sixth attempt is ever scheduled.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(manager.reconnect_attempts(), 5);

        // A manual connect is allowed again (and fails cleanly here, since
        // the server is gone for good).
        let result = manager.connect("user-42").await;
        assert!(matches!(result, Err(Error::ConnectionFailed(_))));
        assert_eq!(manager.reconnect_attempts(), 0);
    }
}
