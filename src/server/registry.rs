//! Registry of live server sessions.
//!
//! Entries are inserted when a connection is accepted and removed when its
//! handler terminates. Statistics, client listings and broadcasts work on a
//! snapshot so they never hold a map shard across an await.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::watch;

use crate::protocol::{actions, Message};
use crate::services::{Identity, Role};
use crate::transport::Transport;

/// Registry view of one session.
#[derive(Debug)]
pub struct SessionEntry {
    connection_id: String,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    transport: Arc<Transport>,
    identity: watch::Receiver<Option<Identity>>,
}

impl SessionEntry {
    /// Create an entry observing the handler's identity channel
    pub fn new(transport: Arc<Transport>, identity: watch::Receiver<Option<Identity>>) -> Self {
        let remote_addr = transport.peer_addr();
        Self {
            connection_id: remote_addr.to_string(),
            remote_addr,
            connected_at: Utc::now(),
            transport,
            identity,
        }
    }

    /// Registry key
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Remote endpoint
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Accept time
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Latest identity published by the handler
    pub fn identity(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    /// Latest role published by the handler
    pub fn role(&self) -> Option<Role> {
        self.identity.borrow().as_ref().map(|i| i.role)
    }

    /// Shared transport, for out-of-band writes and forced close
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

/// One line of the operator's client listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Connection id
    pub connection_id: String,
    /// Logged-in username
    pub username: Option<String>,
    /// Logged-in role
    pub role: Option<Role>,
    /// Accept time
    pub connected_at: DateTime<Utc>,
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.connection_id,
            self.username.as_deref().unwrap_or("Anonymous")
        )
    }
}

/// Sessions per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleCounts {
    /// Admin sessions
    pub admin: usize,
    /// Teacher sessions
    pub teacher: usize,
    /// Student sessions
    pub student: usize,
    /// Sessions not logged in
    pub anonymous: usize,
}

/// Server statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStats {
    /// Registered sessions
    pub connected_clients: usize,
    /// Whether the listener accepts connections
    pub running: bool,
    /// Bound port
    pub port: u16,
    /// Seconds since start
    pub uptime_secs: u64,
    /// Admin sessions
    pub admin_clients: usize,
    /// Teacher sessions
    pub teacher_clients: usize,
    /// Student sessions
    pub student_clients: usize,
}

impl fmt::Display for ServerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Server running: {}", self.running)?;
        writeln!(f, "Port: {}", self.port)?;
        writeln!(f, "Uptime: {}s", self.uptime_secs)?;
        writeln!(f, "Connected clients: {}", self.connected_clients)?;
        writeln!(f, "  Admins: {}", self.admin_clients)?;
        writeln!(f, "  Teachers: {}", self.teacher_clients)?;
        write!(f, "  Students: {}", self.student_clients)
    }
}

/// Concurrent map of live sessions keyed by connection id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionEntry>>,
}

impl SessionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning any entry it displaced.
    pub fn insert(&self, entry: Arc<SessionEntry>) -> Option<Arc<SessionEntry>> {
        self.sessions.insert(entry.connection_id.clone(), entry)
    }

    /// Remove exactly this entry. A newer entry under the same key is left alone.
    pub fn remove_entry(&self, entry: &Arc<SessionEntry>) -> bool {
        self.sessions
            .remove_if(&entry.connection_id, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
    }

    /// Entry by connection id
    pub fn get(&self, connection_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(connection_id).map(|e| e.value().clone())
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Point-in-time copy of every entry
    pub fn snapshot(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    /// Sessions per role
    pub fn role_counts(&self) -> RoleCounts {
        let mut counts = RoleCounts::default();
        for entry in self.snapshot() {
            match entry.role() {
                Some(Role::Admin) => counts.admin += 1,
                Some(Role::Teacher) => counts.teacher += 1,
                Some(Role::Student) => counts.student += 1,
                None => counts.anonymous += 1,
            }
        }
        counts
    }

    /// Client listing, oldest connection first
    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .snapshot()
            .into_iter()
            .map(|entry| {
                let identity = entry.identity();
                ClientInfo {
                    connection_id: entry.connection_id.clone(),
                    username: identity.as_ref().map(|i| i.username.clone()),
                    role: identity.map(|i| i.role),
                    connected_at: entry.connected_at,
                }
            })
            .collect();
        clients.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.connection_id.cmp(&b.connection_id))
        });
        clients
    }

    /// Send a BROADCAST notification to every session.
    ///
    /// Each write is bounded by `per_send`; a slow or failed session is
    /// skipped. Returns the number of sessions reached.
    pub async fn broadcast(&self, text: &str, per_send: Duration) -> usize {
        let note = Message::notification(actions::BROADCAST, text);
        let entries = self.snapshot();

        let sends = entries.iter().map(|entry| {
            let note = &note;
            async move {
                match tokio::time::timeout(per_send, entry.transport.send(note)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %entry.connection_id, "Broadcast failed: {}", e);
                        false
                    },
                    Err(_) => {
                        tracing::debug!(connection_id = %entry.connection_id, "Broadcast timed out");
                        false
                    },
                }
            }
        });

        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        tracing::info!(delivered, total = entries.len(), "Broadcast sent");
        delivered
    }

    /// Close every registered transport. Handlers observe EOF and deregister.
    pub async fn close_all(&self) {
        let entries = self.snapshot();
        join_all(entries.iter().map(|entry| entry.transport.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;
    use tokio::net::{TcpListener, TcpStream};

    async fn entry() -> (Arc<SessionEntry>, watch::Sender<Option<Identity>>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let transport = Transport::from_stream(accepted.unwrap().0, TransportConfig::default()).unwrap();
        let (tx, rx) = watch::channel(None);
        (Arc::new(SessionEntry::new(Arc::new(transport), rx)), tx, client.unwrap())
    }

    fn identity(username: &str, role: Role) -> Identity {
        Identity {
            user_id: 1,
            username: username.into(),
            full_name: String::new(),
            role,
        }
    }

    #[tokio::test]
    async fn test_insert_remove() {
        let registry = SessionRegistry::new();
        let (a, _tx, _client) = entry().await;

        assert!(registry.insert(a.clone()).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(a.connection_id()).is_some());

        assert!(registry.remove_entry(&a));
        assert!(!registry.remove_entry(&a));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_leaves_replacement() {
        let registry = SessionRegistry::new();
        let (a, _tx, _client) = entry().await;
        let (_, rx) = watch::channel(None);
        let replacement = Arc::new(SessionEntry::new(a.transport().clone(), rx));

        registry.insert(a.clone());
        registry.insert(replacement.clone());

        assert!(!registry.remove_entry(&a));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_entry(&replacement));
    }

    #[tokio::test]
    async fn test_role_counts_follow_identity() {
        let registry = SessionRegistry::new();
        let (a, tx_a, _ca) = entry().await;
        let (b, tx_b, _cb) = entry().await;
        let (c, _tx_c, _cc) = entry().await;
        registry.insert(a);
        registry.insert(b);
        registry.insert(c);

        tx_a.send_replace(Some(identity("admin", Role::Admin)));
        tx_b.send_replace(Some(identity("student1", Role::Student)));

        let counts = registry.role_counts();
        assert_eq!(counts.admin, 1);
        assert_eq!(counts.student, 1);
        assert_eq!(counts.anonymous, 1);

        tx_b.send_replace(None);
        assert_eq!(registry.role_counts().anonymous, 2);
    }

    #[tokio::test]
    async fn test_client_info_display() {
        let registry = SessionRegistry::new();
        let (a, tx, _client) = entry().await;
        registry.insert(a.clone());

        let listed = registry.clients();
        assert_eq!(listed[0].to_string(), format!("{} (Anonymous)", a.connection_id()));

        tx.send_replace(Some(identity("teacher1", Role::Teacher)));
        let listed = registry.clients();
        assert_eq!(listed[0].to_string(), format!("{} (teacher1)", a.connection_id()));
        assert_eq!(listed[0].role, Some(Role::Teacher));
    }

    #[tokio::test]
    async fn test_broadcast_and_close_all() {
        let registry = SessionRegistry::new();
        let (a, _tx, client) = entry().await;
        registry.insert(a.clone());

        let peer = Transport::from_stream(client, TransportConfig::default()).unwrap();
        let delivered = registry.broadcast("maintenance at noon", Duration::from_secs(1)).await;
        assert_eq!(delivered, 1);

        let note = peer.receive().await.unwrap().unwrap();
        assert!(note.is_notification());
        assert_eq!(note.action, actions::BROADCAST);
        assert_eq!(note.message, "maintenance at noon");

        registry.close_all().await;
        assert!(a.transport().is_closed());
        assert!(peer.receive().await.unwrap().is_none());
        assert_eq!(registry.broadcast("again", Duration::from_secs(1)).await, 0);
    }
}
