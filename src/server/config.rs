//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::protocol::DEFAULT_PORT;
use crate::transport::TransportConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Maximum sessions served concurrently; further sessions queue
    pub max_sessions: usize,
    /// How long `stop` waits for sessions to drain before aborting them
    pub shutdown_grace: Duration,
    /// Upper bound on a single broadcast write to one session
    pub broadcast_timeout: Duration,
    /// Transport settings for accepted connections
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            max_sessions: 100,
            shutdown_grace: Duration::from_secs(5),
            broadcast_timeout: Duration::from_secs(2),
            transport: TransportConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.addr.set_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set the session pool size, clamped to `1..=Semaphore::MAX_PERMITS`
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.clamp(1, Semaphore::MAX_PERMITS);
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the per-session broadcast write timeout
    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    /// Set transport settings
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}
