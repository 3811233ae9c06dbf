//! Listener loop and session supervision.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SmsError};
use crate::services::Services;
use crate::transport::Transport;

use super::config::ServerConfig;
use super::dispatch::Dispatcher;
use super::handler::SessionHandler;
use super::registry::{ClientInfo, RoleCounts, ServerStats, SessionEntry, SessionRegistry};

/// Removes a session's registry entry when its worker ends, aborted or not.
struct Deregister {
    registry: Arc<SessionRegistry>,
    entry: Arc<SessionEntry>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry.remove_entry(&self.entry);
    }
}

struct Shared {
    config: ServerConfig,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<Semaphore>,
    workers: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    started_at: Instant,
}

/// Multi-session server.
///
/// Cheap to clone; every clone controls the same listener.
///
/// ```rust,ignore
/// let server = Server::bind(ServerConfig::default().with_port(8888), Services::in_memory()).await?;
/// server.start()?;
/// server.broadcast("maintenance at noon").await;
/// server.stop().await;
/// ```
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// Bind the listening socket with the built-in action table.
    pub async fn bind(config: ServerConfig, services: Services) -> Result<Self> {
        Self::bind_with(config, Dispatcher::with_default_routes(services)).await
    }

    /// Bind the listening socket with a custom action table.
    pub async fn bind_with(config: ServerConfig, dispatcher: Dispatcher) -> Result<Self> {
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|e| SmsError::Server(format!("Failed to bind {}: {e}", config.addr)))?;
        let local_addr = listener.local_addr()?;
        let permits = config.max_sessions.clamp(1, Semaphore::MAX_PERMITS);

        Ok(Self {
            shared: Arc::new(Shared {
                pool: Arc::new(Semaphore::new(permits)),
                config,
                local_addr,
                listener: Mutex::new(Some(listener)),
                accept_task: Mutex::new(None),
                registry: Arc::new(SessionRegistry::new()),
                dispatcher: Arc::new(dispatcher),
                workers: Mutex::new(JoinSet::new()),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                started_at: Instant::now(),
            }),
        })
    }

    /// Bind and start accepting in one step.
    pub async fn start_with(config: ServerConfig, services: Services) -> Result<Self> {
        let server = Self::bind(config, services).await?;
        server.start()?;
        Ok(server)
    }

    /// Start the accept loop in the background. A second call is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(SmsError::Server("server already stopped".into()));
        }
        let Some(listener) = self.shared.listener.lock().take() else {
            return Ok(());
        };

        self.shared.started.store(true, Ordering::Release);
        tracing::info!(
            addr = %self.shared.local_addr,
            max_sessions = self.shared.config.max_sessions,
            "Server listening"
        );

        let shared = self.shared.clone();
        let task = tokio::spawn(async move { shared.accept_loop(listener).await });
        *self.shared.accept_task.lock() = Some(task);
        Ok(())
    }

    /// Stop accepting, close every session, wait out the grace period, abort stragglers.
    ///
    /// Idempotent; later calls return immediately.
    pub async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Stopping server");
        self.shared.shutdown.cancel();

        drop(self.shared.listener.lock().take());
        let accept_task = self.shared.accept_task.lock().take();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                tracing::warn!("Accept loop ended abnormally: {}", e);
            }
        }

        let grace = self.shared.config.shutdown_grace;
        let deadline = tokio::time::Instant::now() + grace;
        if tokio::time::timeout_at(deadline, self.shared.registry.close_all())
            .await
            .is_err()
        {
            tracing::warn!(?grace, "Closing sessions exceeded grace period");
        }

        let mut workers = std::mem::take(&mut *self.shared.workers.lock());
        let drained = tokio::time::timeout_at(deadline, async {
            while workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            tracing::warn!(remaining = workers.len(), ?grace, "Aborting sessions after grace period");
        }
        workers.shutdown().await;

        tracing::info!("Server stopped");
    }

    /// Resolve once [`stop`](Self::stop) has been requested.
    pub async fn stopped(&self) {
        self.shared.shutdown.cancelled().await;
    }

    /// Send a BROADCAST notification to every session; returns how many were reached.
    pub async fn broadcast(&self, text: &str) -> usize {
        self.shared
            .registry
            .broadcast(text, self.shared.config.broadcast_timeout)
            .await
    }

    /// Whether the accept loop is running
    pub fn is_running(&self) -> bool {
        self.shared.started.load(Ordering::Acquire) && !self.shared.stopped.load(Ordering::Acquire)
    }

    /// Bound address (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Registered sessions
    pub fn connected_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Sessions per role
    pub fn role_counts(&self) -> RoleCounts {
        self.shared.registry.role_counts()
    }

    /// Client listing
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.shared.registry.clients()
    }

    /// Server statistics
    pub fn stats(&self) -> ServerStats {
        let counts = self.role_counts();
        ServerStats {
            connected_clients: self.connected_count(),
            running: self.is_running(),
            port: self.shared.local_addr.port(),
            uptime_secs: self.shared.started_at.elapsed().as_secs(),
            admin_clients: counts.admin,
            teacher_clients: counts.teacher,
            student_clients: counts.student,
        }
    }

    /// The session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.shared.registry
    }

    /// Sessions holding a pool slot
    pub fn active_sessions(&self) -> usize {
        self.shared.config.max_sessions - self.shared.pool.available_permits()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.shared.local_addr)
            .field("running", &self.is_running())
            .field("sessions", &self.connected_count())
            .finish_non_exhaustive()
    }
}

impl Shared {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                res = listener.accept() => res,
            };

            match accepted {
                Ok((stream, _)) => self.spawn_session(stream),
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
            }
        }
        tracing::info!(addr = %self.local_addr, "Listener closed");
    }

    fn spawn_session(&self, stream: TcpStream) {
        let transport = match Transport::from_stream(stream, self.config.transport) {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                tracing::warn!("Dropping accepted connection: {}", e);
                return;
            },
        };

        let (handler, entry) = SessionHandler::new(transport, self.dispatcher.clone());
        if self.registry.insert(entry.clone()).is_some() {
            tracing::warn!(connection_id = %entry.connection_id(), "Replaced stale registry entry");
        }
        tracing::debug!(
            connection_id = %entry.connection_id(),
            sessions = self.registry.len(),
            "Accepted connection"
        );

        let guard = Deregister {
            registry: self.registry.clone(),
            entry,
        };
        let pool = self.pool.clone();
        let shutdown = self.shutdown.clone();

        let mut workers = self.workers.lock();
        while workers.try_join_next().is_some() {}
        workers.spawn(async move {
            let _guard = guard;
            let _permit = tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                permit = pool.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            handler.run().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{actions, Message};
    use crate::server::{Outcome, RequestContext};
    use tokio::io::AsyncWriteExt;

    fn config() -> ServerConfig {
        ServerConfig::default()
            .with_port(0)
            .with_shutdown_grace(Duration::from_millis(500))
    }

    async fn wait_for_count(server: &Server, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while server.connected_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_stop() {
        let server = Server::start_with(config(), Services::in_memory()).await.unwrap();
        assert!(server.is_running());
        assert_ne!(server.local_addr().port(), 0);

        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
        assert!(server.start().is_err());

        assert!(Transport::open("127.0.0.1", server.local_addr().port()).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_tracks_sessions() {
        let server = Server::start_with(config(), Services::in_memory()).await.unwrap();
        let port = server.local_addr().port();

        let a = Transport::open("127.0.0.1", port).await.unwrap();
        let b = Transport::open("127.0.0.1", port).await.unwrap();
        wait_for_count(&server, 2).await;
        assert_eq!(server.stats().connected_clients, 2);

        a.close().await;
        wait_for_count(&server, 1).await;

        b.close().await;
        wait_for_count(&server, 0).await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_saturated_pool_queues_sessions() {
        let server = Server::start_with(config().with_max_sessions(1), Services::in_memory())
            .await
            .unwrap();
        let port = server.local_addr().port();

        let first = Transport::open("127.0.0.1", port).await.unwrap();
        let second = Transport::open("127.0.0.1", port).await.unwrap();
        wait_for_count(&server, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.active_sessions(), 1);

        first.close().await;

        second.send(&Message::request(actions::LOGOUT)).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), second.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.action, actions::LOGOUT);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_queued_and_active_sessions() {
        let server = Server::start_with(config().with_max_sessions(1), Services::in_memory())
            .await
            .unwrap();
        let port = server.local_addr().port();

        let active = Transport::open("127.0.0.1", port).await.unwrap();
        let queued = Transport::open("127.0.0.1", port).await.unwrap();
        wait_for_count(&server, 2).await;

        server.stop().await;

        assert!(active.receive().await.unwrap().is_none());
        assert!(queued.receive().await.unwrap().is_none());
        assert_eq!(server.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_aborts_sessions_stuck_in_a_handler() {
        let mut dispatcher = Dispatcher::new(Services::in_memory());
        dispatcher.register_public("SLOW", |_: &RequestContext, _: &Services, request: &Message| -> Result<Outcome> {
            std::thread::sleep(Duration::from_secs(2));
            Ok(Outcome::reply(Message::success_response(&request.action, "done")))
        });
        let server = Server::bind_with(config().with_shutdown_grace(Duration::from_millis(300)), dispatcher)
            .await
            .unwrap();
        server.start().unwrap();
        let port = server.local_addr().port();

        let client = Transport::open("127.0.0.1", port).await.unwrap();
        wait_for_count(&server, 1).await;
        client.send(&Message::request("SLOW")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        server.stop().await;
        assert!(started.elapsed() < Duration::from_millis(1500), "stop waited for the handler");
        assert_eq!(server.connected_count(), 0);
        assert!(client.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_with_client_that_never_reads() {
        let server = Server::start_with(
            config()
                .with_broadcast_timeout(Duration::from_millis(100))
                .with_shutdown_grace(Duration::from_millis(500)),
            Services::in_memory(),
        )
        .await
        .unwrap();
        let port = server.local_addr().port();

        // raw socket that never reads its side
        let mut stalled = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        wait_for_count(&server, 1).await;

        let text = "b".repeat(4 * 1024 * 1024);
        for _ in 0..4 {
            server.broadcast(&text).await;
        }

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(3), server.stop())
            .await
            .expect("stop blocked on a client that never reads");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(server.connected_count(), 0);

        stalled.shutdown().await.ok();
    }

    #[tokio::test]
    async fn test_oversized_pool_binds() {
        let mut config = config();
        config.max_sessions = usize::MAX;
        let server = Server::start_with(config, Services::in_memory()).await.unwrap();
        assert!(server.is_running());
        server.stop().await;
    }
}
