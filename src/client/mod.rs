//! Client session: one connection, a background pump, correlated requests.
//!
//! # Lifecycle
//!
//! ```text
//!                 connect ok
//!  Disconnected ─────────────────▶ Connected
//!       ▲  ▲                          │
//!       │  │ attempts exhausted       │ EOF / transport error
//!       │  │                          ▼
//!       │  └────────────── Reconnecting ◀── policy yields a delay
//!       │                             │
//!       └──── disconnect() ───────────┘  (from any state)
//! ```
//!
//! # Request correlation
//!
//! [`ClientSession::send_request_and_wait`] stamps each request with a fresh
//! `correlationId`, registers a waiter and suspends only the calling task.
//! The pump delivers the matching response; any message no waiter claims
//! goes to the installed [`NotificationSink`]. Several requests may be in
//! flight at once, including several with the same action.
//!
//! # Example
//!
//! ```rust,ignore
//! use sms::client::ClientSession;
//!
//! let session = ClientSession::new();
//! if session.connect("localhost", 8888).await {
//!     let reply = session.login("alice", "secret").await;
//!     assert!(reply.success);
//! }
//! ```

mod backoff;
mod config;
mod pending;
mod sink;

pub use backoff::{BackoffPolicy, ExponentialBackoff, FixedBackoff, NoReconnect};
pub use config::ClientConfig;
pub use pending::PendingRequests;
pub use sink::{ChannelSink, NoopSink, NotificationSink, SinkEvent};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::{actions, keys, text, Message};
use crate::services::StudentRecord;
use crate::transport::Transport;

/// Connection state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport
    Disconnected,
    /// Transport open, pump running
    Connected,
    /// Waiting for or performing a reconnect attempt
    Reconnecting,
}

/// One transport instance and its once-only flags.
struct Connection {
    transport: Transport,
    closing: AtomicBool,
    notified: AtomicBool,
}

impl Connection {
    fn new(transport: Transport) -> Self {
        Self {
            transport,
            closing: AtomicBool::new(false),
            notified: AtomicBool::new(false),
        }
    }

    /// True exactly once per connection.
    fn claim_notification(&self) -> bool {
        !self.notified.swap(true, Ordering::AcqRel)
    }
}

struct Inner {
    config: ClientConfig,
    state: watch::Sender<SessionState>,
    connection: Mutex<Option<Arc<Connection>>>,
    endpoint: Mutex<Option<(String, u16)>>,
    pending: PendingRequests,
    sink: RwLock<Arc<dyn NotificationSink>>,
    backoff: RwLock<Arc<dyn BackoffPolicy>>,
    reconnect: Mutex<CancellationToken>,
    /// Serializes `connect` and reconnect attempts
    connect_gate: tokio::sync::Mutex<()>,
}

/// Client side of a session.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<Inner>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("state", &self.state())
            .field("pending", &self.inner.pending)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Session with default configuration
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Session with explicit configuration
    pub fn with_config(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                connection: Mutex::new(None),
                endpoint: Mutex::new(None),
                pending: PendingRequests::new(),
                sink: RwLock::new(Arc::new(NoopSink)),
                backoff: RwLock::new(Arc::new(config.reconnect)),
                reconnect: Mutex::new(CancellationToken::new()),
                connect_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Install the handler for unsolicited messages and connection events
    pub fn set_sink(&self, sink: Arc<dyn NotificationSink>) {
        *self.inner.sink.write() = sink;
    }

    /// Replace the reconnect schedule
    pub fn set_backoff(&self, backoff: Arc<dyn BackoffPolicy>) {
        *self.inner.backoff.write() = backoff;
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether a transport is open
    pub fn is_connected(&self) -> bool {
        self.inner.connection.lock().is_some()
    }

    /// `host:port` of the last endpoint passed to [`connect`](Self::connect)
    pub fn server_info(&self) -> Option<String> {
        self.inner
            .endpoint
            .lock()
            .as_ref()
            .map(|(host, port)| format!("{host}:{port}"))
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Check whether `host:port` accepts connections, without opening a session.
    pub async fn test_connection(host: &str, port: u16) -> bool {
        match Transport::open(host, port).await {
            Ok(transport) => {
                transport.close().await;
                true
            },
            Err(e) => {
                tracing::debug!("Connection test failed: {}", e);
                false
            },
        }
    }

    /// Open a transport to `host:port` and start the inbound pump.
    ///
    /// Returns `false` on any failure; never retries on its own.
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        let _gate = self.inner.connect_gate.lock().await;
        if self.is_connected() {
            return true;
        }

        {
            let mut token = self.inner.reconnect.lock();
            token.cancel();
            *token = CancellationToken::new();
        }
        *self.inner.endpoint.lock() = Some((host.to_string(), port));

        match Transport::open_with(host, port, self.inner.config.transport).await {
            Ok(transport) => {
                tracing::info!("Connected to server {}:{}", host, port);
                self.install(transport).await;
                true
            },
            Err(e) => {
                tracing::warn!("Failed to connect to {}:{}: {}", host, port, e);
                self.inner.state.send_replace(SessionState::Disconnected);
                false
            },
        }
    }

    /// Close the transport and stop the pump. Cancels any scheduled reconnect.
    ///
    /// Waiters resolve with an error response; the sink's disconnect callback
    /// fires if it has not already for this transport.
    pub async fn disconnect(&self) {
        self.inner.reconnect.lock().cancel();
        let connection = self.inner.connection.lock().take();
        self.inner.state.send_replace(SessionState::Disconnected);

        if let Some(conn) = connection {
            conn.closing.store(true, Ordering::Release);
            conn.transport.close().await;
            self.inner.pending.fail_all(text::DISCONNECTED);
            if conn.claim_notification() {
                self.sink().on_disconnected();
            }
            tracing::info!("Disconnected from server");
        }
    }

    /// Send without waiting for a reply. `false` if not connected or the write failed.
    pub async fn send_request(&self, request: &Message) -> bool {
        let Some(conn) = self.current() else {
            tracing::warn!(action = %request.action, "Cannot send request: not connected");
            return false;
        };

        match conn.transport.send(request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(action = %request.action, "Failed to send request: {}", e);
                if e.is_transport() {
                    self.connection_lost(&conn, Some(e.to_string())).await;
                }
                false
            },
        }
    }

    /// Send `request` and suspend until its response, a disconnect, or `timeout`.
    /// The timeout covers the write as well as the wait.
    ///
    /// Never fails: send errors, timeouts and disconnects come back as a
    /// response with `success == false` and the request's action.
    pub async fn send_request_and_wait(&self, mut request: Message, timeout: Duration) -> Message {
        let action = request.action.clone();
        let Some(conn) = self.current() else {
            return Message::error_response(&action, text::SEND_FAILED);
        };

        let id = Uuid::new_v4().to_string();
        request.set_correlation_id(&id);
        let rx = self.inner.pending.register(&id, &action);

        let deadline = tokio::time::Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, conn.transport.send(&request)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                self.inner.pending.cancel(&id);
                tracing::warn!(%action, "Failed to send request: {}", e);
                if e.is_transport() {
                    self.connection_lost(&conn, Some(e.to_string())).await;
                }
                return Message::error_response(&action, text::SEND_FAILED).with_correlation_id(&id);
            },
            Err(_) => {
                self.inner.pending.cancel(&id);
                tracing::warn!(%action, ?timeout, "Request write timed out");
                return Message::error_response(&action, text::TIMEOUT).with_correlation_id(&id);
            },
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                Message::error_response(&action, text::CONNECTION_LOST).with_correlation_id(&id)
            },
            Err(_) => {
                self.inner.pending.cancel(&id);
                tracing::warn!(%action, ?timeout, "Request timed out");
                Message::error_response(&action, text::TIMEOUT).with_correlation_id(&id)
            },
        }
    }

    async fn call(&self, request: Message) -> Message {
        self.send_request_and_wait(request, self.inner.config.request_timeout)
            .await
    }

    /// LOGIN with credentials
    pub async fn login(&self, username: &str, password: &str) -> Message {
        self.call(
            Message::request(actions::LOGIN)
                .with_data(keys::USERNAME, username)
                .with_data(keys::PASSWORD, password),
        )
        .await
    }

    /// LOGOUT
    pub async fn logout(&self) -> Message {
        self.call(Message::request(actions::LOGOUT)).await
    }

    /// CHANGE_PASSWORD for the logged-in user
    pub async fn change_password(&self, new_password: &str) -> Message {
        self.call(Message::request(actions::CHANGE_PASSWORD).with_data(keys::PASSWORD, new_password))
            .await
    }

    /// GET_STUDENT_INFO; staff pass an id, students get their own record
    pub async fn get_student_info(&self, student_id: Option<i64>) -> Message {
        let mut request = Message::request(actions::GET_STUDENT_INFO);
        if let Some(id) = student_id {
            request.insert(keys::STUDENT_ID, id);
        }
        self.call(request).await
    }

    /// GET_ALL_STUDENTS
    pub async fn get_all_students(&self) -> Message {
        self.call(Message::request(actions::GET_ALL_STUDENTS)).await
    }

    /// SEARCH_STUDENTS by keyword
    pub async fn search_students(&self, keyword: &str) -> Message {
        self.call(Message::request(actions::SEARCH_STUDENTS).with_data(keys::SEARCH_KEYWORD, keyword))
            .await
    }

    /// ADD_STUDENT
    pub async fn add_student(&self, student: &StudentRecord) -> Message {
        self.call_with_record(actions::ADD_STUDENT, student).await
    }

    /// UPDATE_STUDENT
    pub async fn update_student(&self, student: &StudentRecord) -> Message {
        self.call_with_record(actions::UPDATE_STUDENT, student).await
    }

    async fn call_with_record(&self, action: &str, student: &StudentRecord) -> Message {
        let mut request = Message::request(action);
        if let Err(e) = request.put(keys::STUDENT, student) {
            tracing::warn!(%action, "Cannot encode student record: {}", e);
            return Message::error_response(action, text::INVALID_DATA);
        }
        self.call(request).await
    }

    /// GET_ALL_COURSES
    pub async fn get_all_courses(&self) -> Message {
        self.call(Message::request(actions::GET_ALL_COURSES)).await
    }

    /// GET_COURSES (alias of GET_ALL_COURSES)
    pub async fn get_courses(&self) -> Message {
        self.call(Message::request(actions::GET_COURSES)).await
    }

    /// GET_COURSE_INFO
    pub async fn get_course_info(&self, course_id: i64) -> Message {
        self.call(Message::request(actions::GET_COURSE_INFO).with_data(keys::COURSE_ID, course_id))
            .await
    }

    /// GET_ENROLLMENTS; staff pass an id, students get their own
    pub async fn get_enrollments(&self, student_id: Option<i64>) -> Message {
        let mut request = Message::request(actions::GET_ENROLLMENTS);
        if let Some(id) = student_id {
            request.insert(keys::STUDENT_ID, id);
        }
        self.call(request).await
    }

    /// GET_STUDENT_GRADES
    pub async fn get_student_grades(&self, student_id: i64) -> Message {
        self.call(Message::request(actions::GET_STUDENT_GRADES).with_data(keys::STUDENT_ID, student_id))
            .await
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.inner.connection.lock().clone()
    }

    fn sink(&self) -> Arc<dyn NotificationSink> {
        self.inner.sink.read().clone()
    }

    async fn install(&self, transport: Transport) {
        let conn = Arc::new(Connection::new(transport));
        let displaced = self.inner.connection.lock().replace(conn.clone());
        self.inner.state.send_replace(SessionState::Connected);

        let session = self.clone();
        tokio::spawn(async move { session.pump(conn).await });

        if let Some(old) = displaced {
            tracing::debug!("Closing displaced connection");
            old.closing.store(true, Ordering::Release);
            old.transport.close().await;
        }
    }

    async fn pump(self, conn: Arc<Connection>) {
        loop {
            match conn.transport.receive().await {
                Ok(Some(message)) => self.route(message),
                Ok(None) => {
                    self.connection_lost(&conn, None).await;
                    break;
                },
                Err(e) if e.is_transport() => {
                    self.connection_lost(&conn, Some(e.to_string())).await;
                    break;
                },
                Err(e) => tracing::warn!("Discarding malformed message: {}", e),
            }
        }
        tracing::debug!("Inbound pump stopped");
    }

    fn route(&self, message: Message) {
        if message.is_request() {
            tracing::debug!(action = %message.action, "Ignoring request sent by server");
            return;
        }
        if let Some(unclaimed) = self.inner.pending.complete(message) {
            self.sink().on_response(unclaimed);
        }
    }

    /// Tear down after EOF or a transport error, then hand off to the
    /// reconnect schedule. No-op for a connection already closed by `disconnect`.
    async fn connection_lost(&self, conn: &Arc<Connection>, error: Option<String>) {
        if conn.closing.load(Ordering::Acquire) {
            return;
        }

        let was_current = {
            let mut slot = self.inner.connection.lock();
            if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
                slot.take();
                true
            } else {
                false
            }
        };
        conn.transport.close().await;
        if !was_current {
            return;
        }

        match &error {
            Some(e) => tracing::warn!("Connection lost: {}", e),
            None => tracing::info!("Server closed the connection"),
        }
        self.inner.state.send_replace(SessionState::Disconnected);
        self.inner.pending.fail_all(text::CONNECTION_LOST);

        if conn.claim_notification() {
            let sink = self.sink();
            if let Some(e) = &error {
                sink.on_error(e);
            }
            sink.on_disconnected();
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let token = self.inner.reconnect.lock().clone();
        let backoff = self.inner.backoff.read().clone();
        let endpoint = self.inner.endpoint.lock().clone();

        let Some((host, port)) = endpoint else {
            return;
        };
        if token.is_cancelled() || backoff.next_delay(0).is_none() {
            return;
        }

        let session = self.clone();
        tokio::spawn(async move { session.reconnect_loop(host, port, backoff, token).await });
    }

    async fn reconnect_loop(
        self,
        host: String,
        port: u16,
        backoff: Arc<dyn BackoffPolicy>,
        token: CancellationToken,
    ) {
        let mut attempt = 0;
        while let Some(delay) = backoff.next_delay(attempt) {
            self.inner.state.send_replace(SessionState::Reconnecting);
            tracing::info!(attempt = attempt + 1, ?delay, "Reconnecting to {}:{}", host, port);

            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {},
            }

            let _gate = self.inner.connect_gate.lock().await;
            if token.is_cancelled() || self.is_connected() {
                return;
            }
            match Transport::open_with(&host, port, self.inner.config.transport).await {
                Ok(transport) if token.is_cancelled() => {
                    transport.close().await;
                    return;
                },
                Ok(transport) => {
                    tracing::info!("Reconnected to {}:{}", host, port);
                    self.install(transport).await;
                    return;
                },
                Err(e) => tracing::warn!("Reconnect attempt failed: {}", e),
            }
            attempt += 1;
        }

        tracing::warn!("Giving up reconnecting to {}:{}", host, port);
        self.inner.state.send_replace(SessionState::Disconnected);
    }
}
