//! Client and server configuration.
use std::time::Duration;

use crate::protocol::Endpoint;

/// Default wait for a reply before a connection is declared dead.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Sessions a server keeps open before it turns clients away.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

/// How a client reaches its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// Bound on dials, writes and every wait for a reply. `None` blocks forever.
    pub timeout: Option<Duration>,
    /// Redial once, silently, when a write hits a dead socket.
    pub auto_reconnect: bool,
}

impl ClientConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Millisecond form of [`ClientConfig::with_timeout`]; a negative value blocks
    /// forever.
    pub fn with_timeout_millis(self, millis: i64) -> Self {
        let timeout = u64::try_from(millis).ok().map(Duration::from_millis);
        self.with_timeout(timeout)
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default_local(),
            timeout: Some(DEFAULT_TIMEOUT),
            auto_reconnect: false,
        }
    }
}

/// Where a server listens and how many sessions it serves at once.
///
/// Every session runs on its own thread. Clients that connect while
/// `max_sessions` sessions are open are disconnected straight away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub endpoint: Endpoint,
    pub max_sessions: usize,
}

impl ServerConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default_local(),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Some(Duration::from_secs(600)));
        assert!(!config.auto_reconnect);
        assert_eq!(config.endpoint, Endpoint::default_local());
    }

    #[test]
    fn negative_timeout_blocks_forever() {
        let config = ClientConfig::default().with_timeout_millis(-1);
        assert_eq!(config.timeout, None);

        let config = config.with_timeout_millis(250);
        assert_eq!(config.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn server_builder() {
        let endpoint = Endpoint::Tcp("127.0.0.1:0".into());
        let config = ServerConfig::new(endpoint.clone());
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);

        let config = config.with_max_sessions(2);
        assert_eq!(config.endpoint, endpoint);
        assert_eq!(config.max_sessions, 2);
    }
}
