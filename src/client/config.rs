//! Client session configuration.

use std::time::Duration;

use super::backoff::FixedBackoff;
use crate::transport::TransportConfig;

/// Client session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Timeout used by the typed request helpers
    pub request_timeout: Duration,
    /// Reconnect schedule applied when the connection drops
    pub reconnect: FixedBackoff,
    /// Transport settings
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            reconnect: FixedBackoff::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the helper request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reconnect schedule
    pub fn with_reconnect(mut self, delay: Duration, attempts: u32) -> Self {
        self.reconnect = FixedBackoff::new(delay, attempts);
        self
    }

    /// Set the transport settings
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.reconnect.delay, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 1);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new()
            .with_request_timeout(Duration::from_secs(2))
            .with_reconnect(Duration::from_millis(100), 3);
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, 3);
    }
}
