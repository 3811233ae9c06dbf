//! Per-connection request loop.

use std::sync::Arc;

use tokio::sync::watch;

use crate::protocol::{actions, text, Message};
use crate::services::Identity;
use crate::transport::Transport;

use super::dispatch::{Dispatcher, RequestContext, SessionChange};
use super::registry::SessionEntry;

/// Serves one accepted connection: receive, dispatch, respond, repeat.
///
/// Requests on one connection are handled strictly one at a time. The
/// session identity lives here and is only changed by this handler's task;
/// the registry sees it through a watch channel.
pub struct SessionHandler {
    transport: Arc<Transport>,
    connection_id: String,
    dispatcher: Arc<Dispatcher>,
    authenticated_user: Option<Identity>,
    identity_tx: watch::Sender<Option<Identity>>,
}

impl SessionHandler {
    /// Create a handler and the registry entry that observes it.
    pub fn new(transport: Arc<Transport>, dispatcher: Arc<Dispatcher>) -> (Self, Arc<SessionEntry>) {
        let (identity_tx, identity_rx) = watch::channel(None);
        let entry = Arc::new(SessionEntry::new(transport.clone(), identity_rx));
        let handler = Self {
            connection_id: entry.connection_id().to_string(),
            transport,
            dispatcher,
            authenticated_user: None,
            identity_tx,
        };
        (handler, entry)
    }

    /// Connection id (remote address)
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Identity bound by the last successful LOGIN
    pub fn authenticated_user(&self) -> Option<&Identity> {
        self.authenticated_user.as_ref()
    }

    /// Run until EOF, a transport error, or the transport is closed elsewhere.
    pub async fn run(mut self) {
        tracing::info!(connection_id = %self.connection_id, "Client connected");

        loop {
            let response = match self.transport.receive().await {
                Ok(Some(request)) => self.handle_request(request).await,
                Ok(None) => break,
                Err(e) if e.is_transport() => {
                    tracing::warn!(connection_id = %self.connection_id, "Connection error: {}", e);
                    break;
                },
                Err(e) => {
                    tracing::debug!(connection_id = %self.connection_id, "Malformed frame: {}", e);
                    Message::error_response(actions::ERROR, text::INVALID_DATA)
                },
            };

            if !self.respond(response).await {
                break;
            }
        }

        self.disconnect().await;
        tracing::info!(connection_id = %self.connection_id, "Client disconnected");
    }

    /// Dispatch one request and apply its effect on the session identity.
    pub async fn handle_request(&mut self, request: Message) -> Message {
        tracing::debug!(connection_id = %self.connection_id, action = %request.action, "Request received");

        let ctx = RequestContext {
            connection_id: self.connection_id.clone(),
            remote_addr: self.connection_id.clone(),
            user: self.authenticated_user.clone(),
        };
        let outcome = self.dispatcher.dispatch(ctx, request).await;

        match outcome.change {
            SessionChange::None => {},
            SessionChange::Login(identity) => self.set_user(Some(identity)),
            SessionChange::Logout => self.set_user(None),
        }
        outcome.response
    }

    /// Close the connection and drop the session identity. Idempotent.
    pub async fn disconnect(&mut self) {
        self.set_user(None);
        self.transport.close().await;
    }

    /// Write a response; `false` when the connection is unusable.
    async fn respond(&self, response: Message) -> bool {
        match self.transport.send(&response).await {
            Ok(()) => true,
            Err(e) if e.is_transport() => {
                tracing::debug!(connection_id = %self.connection_id, "Failed to send response: {}", e);
                false
            },
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, action = %response.action, "Response not sendable: {}", e);
                let mut fallback = Message::error_response(&response.action, text::SERVER_ERROR);
                if let Some(id) = response.correlation_id() {
                    fallback.set_correlation_id(id);
                }
                self.transport.send(&fallback).await.is_ok()
            },
        }
    }

    fn set_user(&mut self, user: Option<Identity>) {
        self.identity_tx.send_replace(user.clone());
        self.authenticated_user = user;
    }
}

impl std::fmt::Debug for SessionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandler")
            .field("connection_id", &self.connection_id)
            .field("authenticated_user", &self.authenticated_user)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::keys;
    use crate::services::{Role, Services};
    use crate::transport::TransportConfig;
    use tokio::net::TcpListener;

    async fn handler() -> (SessionHandler, Arc<SessionEntry>, Transport) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, accepted) = tokio::join!(Transport::open("127.0.0.1", port), listener.accept());
        let server = Transport::from_stream(accepted.unwrap().0, TransportConfig::default()).unwrap();
        let dispatcher = Arc::new(Dispatcher::with_default_routes(Services::in_memory()));
        let (handler, entry) = SessionHandler::new(Arc::new(server), dispatcher);
        (handler, entry, client.unwrap())
    }

    fn login(username: &str, password: &str) -> Message {
        Message::request(actions::LOGIN)
            .with_data(keys::USERNAME, username)
            .with_data(keys::PASSWORD, password)
    }

    #[tokio::test]
    async fn test_login_binds_identity() {
        let (mut handler, entry, _client) = handler().await;

        let response = handler.handle_request(login("teacher1", "teacher123")).await;
        assert!(response.success);
        assert_eq!(handler.authenticated_user().unwrap().role, Role::Teacher);
        assert_eq!(entry.role(), Some(Role::Teacher));

        let response = handler.handle_request(Message::request(actions::LOGOUT)).await;
        assert!(response.success);
        assert!(handler.authenticated_user().is_none());
        assert!(entry.identity().is_none());
    }

    #[tokio::test]
    async fn test_failed_login_keeps_state() {
        let (mut handler, _entry, _client) = handler().await;

        handler.handle_request(login("admin", "admin123")).await;
        let response = handler.handle_request(login("admin", "wrong")).await;
        assert!(!response.success);
        assert_eq!(handler.authenticated_user().unwrap().username, "admin");
    }

    #[tokio::test]
    async fn test_run_serves_requests_until_eof() {
        let (handler, entry, client) = handler().await;
        let task = tokio::spawn(handler.run());

        client.send(&Message::request(actions::GET_ALL_COURSES)).await.unwrap();
        let response = client.receive().await.unwrap().unwrap();
        assert_eq!(response.message, text::UNAUTHORIZED);

        client.send(&login("student1", "student123")).await.unwrap();
        assert!(client.receive().await.unwrap().unwrap().success);

        client.send(&Message::request(actions::GET_COURSES)).await.unwrap();
        let response = client.receive().await.unwrap().unwrap();
        assert!(response.success);
        assert_eq!(response.action, actions::GET_COURSES);

        client.close().await;
        task.await.unwrap();
        assert!(entry.transport().is_closed());
        assert!(entry.identity().is_none());
    }
}
