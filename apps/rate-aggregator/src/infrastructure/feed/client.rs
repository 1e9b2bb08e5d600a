//! Stream Client
//!
//! Owns the single outbound WebSocket connection to the market-data feed.
//!
//! # Lifecycle
//!
//! ```text
//!              connect()                open                 close / error
//! Disconnected ─────────► Connecting ─────────► Open ─► Closing ───────────► Closed
//!      ▲                      ▲                                                │
//!      │ disconnect()         └───────────── reconnect timer ◄─────────────────┘
//!      └─────────────────────────────── (any state)
//! ```
//!
//! Every unsolicited close schedules one reconnect after a bounded
//! exponential backoff measured from the close event. The attempt counter
//! resets only when a connection opens. When the policy is exhausted the
//! client stays `Closed` and reports [`StreamClientError::ReconnectExhausted`]
//! through the error handler.
//!
//! Handlers run on the connection task. Inbound frames are therefore
//! delivered to `on_message` one at a time, in arrival order.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::config::redact_url;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors reported by the stream client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The reconnect policy gave up.
    #[error("maximum reconnection attempts ({attempts}) exceeded")]
    ReconnectExhausted {
        /// Attempts made since the last successful open.
        attempts: u32,
    },
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected, or explicitly disconnected.
    #[default]
    Disconnected,
    /// Opening a connection.
    Connecting,
    /// Connection open.
    Open,
    /// Close frame received, tearing down.
    Closing,
    /// Closed unsolicited; a reconnect may be pending.
    Closed,
}

impl ConnectionState {
    /// Status string reported to callers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
    /// How long [`StreamClient::shutdown`] waits for the close handshake.
    pub shutdown_timeout: Duration,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl StreamClientConfig {
    /// Create a configuration with the given reconnection policy.
    #[must_use]
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self {
            reconnect,
            ..Self::default()
        }
    }
}

// =============================================================================
// Internals
// =============================================================================

type OpenHandler = Arc<dyn Fn() + Send + Sync>;
type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&StreamClientError) + Send + Sync>;
type CloseHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Handlers {
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_error: Option<ErrorHandler>,
    on_close: Option<CloseHandler>,
}

struct Session {
    id: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

struct ClientState {
    connection: ConnectionState,
    target: Option<String>,
    policy: ReconnectPolicy,
    session: Option<Session>,
    reconnect: Option<JoinHandle<()>>,
    next_session_id: u64,
}

impl ClientState {
    fn is_current(&self, id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }
}

enum SessionEnd {
    Detached,
    Closed,
    Failed(StreamClientError),
}

struct Inner {
    config: StreamClientConfig,
    state: Mutex<ClientState>,
    handlers: RwLock<Handlers>,
}

impl Inner {
    fn start_session(self: &Arc<Self>, state: &mut ClientState) {
        let Some(target) = state.target.clone() else {
            return;
        };

        state.next_session_id += 1;
        let id = state.next_session_id;
        state.connection = ConnectionState::Connecting;

        tracing::info!(
            url = %redact_url(&target),
            attempt = state.policy.attempt_count(),
            "Connecting to feed"
        );

        let cancel = CancellationToken::new();
        let (outbound, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Arc::clone(self).run_session(id, target, cancel.clone(), rx));

        state.session = Some(Session {
            id,
            cancel,
            outbound,
            task,
        });
    }

    async fn run_session(
        self: Arc<Self>,
        id: u64,
        target: String,
        cancel: CancellationToken,
        outbound: mpsc::UnboundedReceiver<Message>,
    ) {
        let connected = tokio::select! {
            () = cancel.cancelled() => return,
            result = tokio_tungstenite::connect_async(target.as_str()) => result,
        };

        let end = match connected {
            Ok((ws, _response)) => {
                if !self.mark_open(id) {
                    return;
                }
                self.fire_open();
                self.pump(id, ws, &cancel, outbound).await
            }
            Err(e) => SessionEnd::Failed(e.into()),
        };

        match end {
            SessionEnd::Detached => {}
            SessionEnd::Closed => self.handle_close(id),
            SessionEnd::Failed(e) => {
                if self.state.lock().is_current(id) {
                    tracing::warn!(error = %e, "Feed connection error");
                    metrics::record_feed_error();
                    self.fire_error(&e);
                }
                self.handle_close(id);
            }
        }
    }

    async fn pump(
        &self,
        id: u64,
        ws: WsStream,
        cancel: &CancellationToken,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    while let Ok(message) = outbound.try_recv() {
                        if write.send(message).await.is_err() {
                            break;
                        }
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Detached;
                }
                message = outbound.recv() => {
                    let Some(message) = message else {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Detached;
                    };
                    if let Err(e) = write.send(message).await {
                        return SessionEnd::Failed(e.into());
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.fire_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return SessionEnd::Failed(e.into());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Feed sent close frame");
                            self.mark_closing(id);
                            return SessionEnd::Closed;
                        }
                        Some(Ok(_)) => {
                            // Binary, pong and raw frames carry nothing we consume
                        }
                        Some(Err(e)) => {
                            return SessionEnd::Failed(e.into());
                        }
                        None => {
                            tracing::info!("Feed stream ended");
                            return SessionEnd::Closed;
                        }
                    }
                }
            }
        }
    }

    fn mark_open(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        if !state.is_current(id) {
            return false;
        }

        state.connection = ConnectionState::Open;
        state.policy.reset();
        drop(state);

        metrics::set_feed_connected(true);
        tracing::info!("Feed connection open");
        true
    }

    fn mark_closing(&self, id: u64) {
        let mut state = self.state.lock();
        if state.is_current(id) {
            state.connection = ConnectionState::Closing;
        }
    }

    fn handle_close(self: &Arc<Self>, id: u64) {
        {
            let mut state = self.state.lock();
            if !state.is_current(id) {
                return;
            }
            state.session = None;
            state.connection = ConnectionState::Closed;
        }

        metrics::set_feed_connected(false);
        tracing::warn!("Feed connection closed");
        self.fire_close();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let exhausted = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Closed
                || state.reconnect.as_ref().is_some_and(|h| !h.is_finished())
            {
                return;
            }

            match state.policy.next_delay() {
                Some(delay) => {
                    tracing::info!(
                        attempt = state.policy.attempt_count(),
                        max_attempts = state.policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        "Scheduling feed reconnect"
                    );
                    metrics::record_reconnect_attempt();

                    let inner = Arc::downgrade(self);
                    state.reconnect = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(inner) = inner.upgrade() {
                            inner.reconnect_now();
                        }
                    }));
                    None
                }
                None => Some(state.policy.attempt_count()),
            }
        };

        if let Some(attempts) = exhausted {
            tracing::error!(attempts, "Feed reconnect attempts exhausted, giving up");
            metrics::record_reconnect_exhausted();
            self.fire_error(&StreamClientError::ReconnectExhausted { attempts });
        }
    }

    fn reconnect_now(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.reconnect = None;
        if state.connection != ConnectionState::Closed {
            return;
        }
        self.start_session(&mut state);
    }

    fn fire_open(&self) {
        let handler = self.handlers.read().on_open.clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn fire_message(&self, text: &str) {
        let handler = self.handlers.read().on_message.clone();
        if let Some(handler) = handler {
            handler(text);
        }
    }

    fn fire_error(&self, error: &StreamClientError) {
        let handler = self.handlers.read().on_error.clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }

    fn fire_close(&self) {
        let handler = self.handlers.read().on_close.clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// Self-healing WebSocket client. Cheap to clone; clones share one
/// connection.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`StreamClient`], for use inside its own
/// handlers.
#[derive(Clone)]
pub struct WeakStreamClient {
    inner: Weak<Inner>,
}

impl WeakStreamClient {
    /// Upgrade to a client if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<StreamClient> {
        self.inner.upgrade().map(|inner| StreamClient { inner })
    }
}

impl StreamClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(config: StreamClientConfig) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ClientState {
                    connection: ConnectionState::Disconnected,
                    target: None,
                    policy,
                    session: None,
                    reconnect: None,
                    next_session_id: 0,
                }),
                handlers: RwLock::new(Handlers::default()),
            }),
        }
    }

    /// Open a connection to `target`.
    ///
    /// Does nothing while a connection is opening or open.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn connect(&self, target: &str) {
        let mut state = self.inner.state.lock();
        if matches!(
            state.connection,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            tracing::debug!(state = %state.connection, "Connect ignored, connection in progress");
            return;
        }

        state.target = Some(target.to_string());
        self.inner.start_session(&mut state);
    }

    /// Queue a text frame on the open connection.
    ///
    /// Returns `false`, without side effects, unless the connection is open.
    pub fn send(&self, payload: &str) -> bool {
        let state = self.inner.state.lock();
        if state.connection != ConnectionState::Open {
            return false;
        }

        state.session.as_ref().is_some_and(|session| {
            session
                .outbound
                .send(Message::Text(payload.to_string().into()))
                .is_ok()
        })
    }

    /// Close the connection without reconnecting.
    ///
    /// Cancels any pending reconnect, detaches the handlers from the live
    /// session and resets the state to `Disconnected`. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.detach();
    }

    /// Like [`disconnect`](Self::disconnect), but waits for queued frames
    /// and the close frame to be written.
    pub async fn shutdown(&self) {
        let Some(task) = self.detach() else {
            return;
        };

        let abort = task.abort_handle();
        if tokio::time::timeout(self.inner.config.shutdown_timeout, task)
            .await
            .is_err()
        {
            tracing::warn!("Feed session did not close in time, aborting");
            abort.abort();
        }
    }

    fn detach(&self) -> Option<JoinHandle<()>> {
        let (previous, session, reconnect) = {
            let mut state = self.inner.state.lock();
            let previous = state.connection;
            state.connection = ConnectionState::Disconnected;
            (previous, state.session.take(), state.reconnect.take())
        };

        if let Some(handle) = reconnect {
            handle.abort();
        }

        if previous != ConnectionState::Disconnected {
            metrics::set_feed_connected(false);
            tracing::info!(previous = %previous, "Feed client disconnected");
        }

        session.map(|session| {
            session.cancel.cancel();
            session.task
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionState::Open
    }

    /// Reconnect attempts made since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().policy.attempt_count()
    }

    /// Whether a reconnect is scheduled.
    #[must_use]
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner
            .state
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Set the handler invoked when a connection opens.
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.handlers.write().on_open = Some(Arc::new(handler));
    }

    /// Set the handler invoked for every inbound text frame.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.handlers.write().on_message = Some(Arc::new(handler));
    }

    /// Set the handler invoked on transport errors and reconnect exhaustion.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&StreamClientError) + Send + Sync + 'static,
    {
        self.inner.handlers.write().on_error = Some(Arc::new(handler));
    }

    /// Set the handler invoked when an open connection closes unsolicited.
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.handlers.write().on_close = Some(Arc::new(handler));
    }

    /// A handle that does not keep the client alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakStreamClient {
        WeakStreamClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("status", &self.status())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Open.as_str(), "connected");
        assert_eq!(ConnectionState::Closing.as_str(), "closing");
        assert_eq!(ConnectionState::Closed.as_str(), "closed");
    }

    #[test]
    fn send_before_connect_is_rejected() {
        let client = StreamClient::new(StreamClientConfig::default());
        assert!(!client.send(r#"{"type":"subscribe","symbol":"X"}"#));
        assert_eq!(client.status(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let client = StreamClient::new(StreamClientConfig::default());
        client.disconnect();
        client.disconnect();
        assert_eq!(client.status(), ConnectionState::Disconnected);
        assert!(!client.has_pending_reconnect());
    }

    #[test]
    fn last_handler_registration_wins() {
        let client = StreamClient::new(StreamClientConfig::default());
        let hits = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&hits);
        client.on_message(move |m| first.lock().push(format!("first:{m}")));
        let second = Arc::clone(&hits);
        client.on_message(move |m| second.lock().push(format!("second:{m}")));

        client.inner.fire_message("x");
        assert_eq!(*hits.lock(), vec!["second:x".to_string()]);
    }

    #[test]
    fn weak_handle_does_not_keep_client_alive() {
        let client = StreamClient::new(StreamClientConfig::default());
        let weak = client.downgrade();
        assert!(weak.upgrade().is_some());
        drop(client);
        assert!(weak.upgrade().is_none());
    }
}
