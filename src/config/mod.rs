//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`SMS_*`)
//! - CLI arguments (applied by the binary on top of both)

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ClientConfig;
use crate::error::{Result, SmsError};
use crate::protocol::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT};
use crate::server::ServerConfig;
use crate::transport::TransportConfig;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerSection,

    /// Client configuration
    #[serde(default)]
    pub client: ClientSection,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SmsError::Config(format!("Failed to read config file {}: {e}", path.display())))?;

        toml::from_str(&content).map_err(|e| SmsError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // Server settings
        if let Some(host) = lookup("SMS_SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("SMS_SERVER_PORT").and_then(|v| v.parse().ok()) {
            config.server.port = port;
        }
        if let Some(max) = lookup("SMS_MAX_SESSIONS").and_then(|v| v.parse().ok()) {
            config.server.max_sessions = max;
        }

        // Client settings
        if let Some(host) = lookup("SMS_CLIENT_HOST") {
            config.client.host = host;
        }
        if let Some(port) = lookup("SMS_CLIENT_PORT").and_then(|v| v.parse().ok()) {
            config.client.port = port;
        }
        if let Some(secs) = lookup("SMS_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.client.request_timeout_secs = secs;
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs from defaults)
    pub fn merge(self, other: Self) -> Self {
        Self {
            server: self.server.merge(other.server),
            client: self.client.merge(other.client),
        }
    }

    /// Default config file location (`<config dir>/sms/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sms").join("config.toml"))
    }

    /// Load the default file if present, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let base = match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "Loading config file");
                Self::from_file(path)?
            },
            _ => Self::default(),
        };
        Ok(base.merge(Self::from_env()))
    }

    /// Server runtime configuration
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let server = &self.server;
        let addr = resolve(&server.host, server.port)?;
        Ok(ServerConfig::default()
            .with_addr(addr)
            .with_max_sessions(server.max_sessions)
            .with_shutdown_grace(Duration::from_secs(server.shutdown_grace_secs))
            .with_transport(TransportConfig::default().with_max_frame_bytes(server.max_frame_bytes)))
    }

    /// Client runtime configuration
    pub fn to_client_config(&self) -> ClientConfig {
        let client = &self.client;
        ClientConfig::default()
            .with_request_timeout(Duration::from_secs(client.request_timeout_secs))
            .with_reconnect(
                Duration::from_secs(client.reconnect_delay_secs),
                client.reconnect_attempts,
            )
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| SmsError::Config(format!("Invalid host {host}: {e}")))?
        .next()
        .ok_or_else(|| SmsError::Config(format!("Host {host} resolved to no address")))
}

/// Server section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Sessions served concurrently
    pub max_sessions: usize,

    /// Seconds `stop` waits for sessions to drain
    pub shutdown_grace_secs: u64,

    /// Maximum frame size in bytes
    pub max_frame_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_sessions: 100,
            shutdown_grace_secs: 5,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerSection {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn merge(self, other: Self) -> Self {
        let defaults = Self::default();
        Self {
            host: pick(self.host, other.host, &defaults.host),
            port: pick(self.port, other.port, &defaults.port),
            max_sessions: pick(self.max_sessions, other.max_sessions, &defaults.max_sessions),
            shutdown_grace_secs: pick(
                self.shutdown_grace_secs,
                other.shutdown_grace_secs,
                &defaults.shutdown_grace_secs,
            ),
            max_frame_bytes: pick(self.max_frame_bytes, other.max_frame_bytes, &defaults.max_frame_bytes),
        }
    }
}

/// Client section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Delay before a reconnect attempt
    pub reconnect_delay_secs: u64,

    /// Reconnect attempts after a lost connection (0 disables)
    pub reconnect_attempts: u32,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            request_timeout_secs: 60,
            reconnect_delay_secs: 5,
            reconnect_attempts: 1,
        }
    }
}

impl ClientSection {
    fn merge(self, other: Self) -> Self {
        let defaults = Self::default();
        Self {
            host: pick(self.host, other.host, &defaults.host),
            port: pick(self.port, other.port, &defaults.port),
            request_timeout_secs: pick(
                self.request_timeout_secs,
                other.request_timeout_secs,
                &defaults.request_timeout_secs,
            ),
            reconnect_delay_secs: pick(
                self.reconnect_delay_secs,
                other.reconnect_delay_secs,
                &defaults.reconnect_delay_secs,
            ),
            reconnect_attempts: pick(
                self.reconnect_attempts,
                other.reconnect_attempts,
                &defaults.reconnect_attempts,
            ),
        }
    }
}

fn pick<T: PartialEq>(base: T, other: T, default: &T) -> T {
    if other != *default {
        other
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.client.host, "localhost");
        assert_eq!(config.client.request_timeout_secs, 60);
    }

    #[test]
    fn test_listen_addr() {
        let section = ServerSection::default();
        assert_eq!(section.listen_addr(), "0.0.0.0:8888");
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [server]
            port = 9090
            max_sessions = 10

            [client]
            host = "10.0.0.5"
            request_timeout_secs = 15
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.max_sessions, 10);
        assert_eq!(config.server.shutdown_grace_secs, 5);
        assert_eq!(config.client.host, "10.0.0.5");
        assert_eq!(config.client.request_timeout_secs, 15);
        assert_eq!(config.client.reconnect_attempts, 1);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nhost = \"127.0.0.1\"\nport = 7000").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.listen_addr(), "127.0.0.1:7000");

        let missing = Config::from_file("/nonexistent/sms.toml");
        assert!(matches!(missing, Err(SmsError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SMS_SERVER_PORT", "9999"),
            ("SMS_MAX_SESSIONS", "not-a-number"),
            ("SMS_CLIENT_HOST", "db.example"),
            ("SMS_REQUEST_TIMEOUT_SECS", "3"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.max_sessions, 100);
        assert_eq!(config.client.host, "db.example");
        assert_eq!(config.client.request_timeout_secs, 3);
    }

    #[test]
    fn test_merge_prefers_non_default() {
        let file: Config = toml::from_str("[server]\nport = 7000\nmax_sessions = 4").unwrap();
        let env: Config = toml::from_str("[server]\nport = 7100").unwrap();

        let merged = file.merge(env);
        assert_eq!(merged.server.port, 7100);
        assert_eq!(merged.server.max_sessions, 4);
    }

    #[test]
    fn test_runtime_configs() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config.client.reconnect_attempts = 0;

        let server = config.to_server_config().unwrap();
        assert!(server.addr.ip().is_loopback());
        assert_eq!(server.max_sessions, 100);

        let client = config.to_client_config();
        assert_eq!(client.request_timeout, Duration::from_secs(60));
        assert_eq!(client.reconnect.max_attempts, 0);
    }
}
