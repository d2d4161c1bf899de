//! Endpoint Type

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

/// A `(host, port)` pair identifying a peer, compared by value
///
/// An empty host means "all interfaces" when used as a listen address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on all interfaces for the given port
    pub fn any(port: u16) -> Self {
        Self::new("", port)
    }

    /// Address string suitable for binding; an empty host becomes `0.0.0.0`
    pub fn bind_address(&self) -> String {
        if self.host.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("endpoint '{}' is missing a port", s))?;

        let host = match host.strip_prefix('[') {
            Some(rest) => rest
                .strip_suffix(']')
                .ok_or_else(|| anyhow!("endpoint '{}' has an unterminated IPv6 bracket", s))?,
            None if host.contains(':') => bail!("IPv6 endpoint '{}' must be bracketed", s),
            None => host,
        };

        Ok(Self::new(host, parse_port(port)?))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Parse a port string, accepting the legacy `:9999` form as well as `9999`
pub fn parse_port(s: &str) -> anyhow::Result<u16> {
    let digits = s.trim().trim_start_matches(':');
    digits
        .parse::<u16>()
        .map_err(|e| anyhow!("invalid port '{}': {}", s, e))
}
