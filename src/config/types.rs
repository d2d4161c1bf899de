//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::relay::{DATAGRAM_BUFFER_SIZE, DEFAULT_STREAM_BUFFER_SIZE};
use crate::transport::{Endpoint, Protocol};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub proxy: ProxyConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

/// How the process participates in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Dial the remote host and relay local stdio
    Connect,
    /// Wait for the remote peer and relay local stdio
    Listen,
    /// Relay every inbound connection to a fixed target
    Proxy,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Connect => f.write_str("connect"),
            Mode::Listen => f.write_str("listen"),
            Mode::Proxy => f.write_str("proxy"),
        }
    }
}

/// Single session (connect/listen) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: Mode,
    pub protocol: Protocol,
    /// Remote host in connect mode, bind host in listen mode (empty = all interfaces)
    pub host: String,
    pub port: u16,
}

/// Proxy dispatcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen_port: u16,
    /// Bind host for the proxy listener (empty = all interfaces)
    pub listen_host: String,
    pub target: Option<Endpoint>,
}

/// Relay engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub stream_buffer_size: usize,
    pub datagram_buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Connect,
            protocol: Protocol::Tcp,
            host: String::new(),
            port: 9999,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            listen_host: String::new(),
            target: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            datagram_buffer_size: DATAGRAM_BUFFER_SIZE,
            dial_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SessionConfig {
    /// Endpoint of the session: the remote peer when connecting, the bind
    /// address when listening
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

impl ProxyConfig {
    pub fn listen_endpoint(&self) -> Endpoint {
        Endpoint::new(self.listen_host.clone(), self.listen_port)
    }
}
