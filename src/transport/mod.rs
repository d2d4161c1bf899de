//! Transport Module
//!
//! Connection types consumed by the relays and the provider seam that
//! produces them. The relays never care whether a provider is backed by
//! plain sockets or a tunnel.

pub mod endpoint;
pub mod system;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::bail;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::RelayError;

pub use endpoint::Endpoint;
pub use system::SystemTransport;

/// Transport protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Network name as used in addresses and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => bail!("unsupported protocol '{}', expected 'tcp' or 'udp'", other),
        }
    }
}

/// A connection-oriented byte stream to exactly one peer
pub trait StreamConnection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Address of the peer, when the underlying transport knows it
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Owned, type-erased stream connection
pub type BoxedStream = Box<dyn StreamConnection>;

impl StreamConnection for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

impl StreamConnection for DuplexStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl StreamConnection for BoxedStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        (**self).peer_addr()
    }
}

/// Accepts inbound stream connections
pub trait StreamListener: Send + Sync {
    /// Wait for the next inbound connection
    fn accept(&self) -> BoxFuture<'_, io::Result<BoxedStream>>;

    /// Address the listener is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// An established connection, tagged once with its transport kind
pub enum Transport {
    Stream(BoxedStream),
    /// A datagram socket, either connected to one peer (dialed) or unbound
    /// and waiting to learn its peer (listening)
    Packet(UdpSocket),
}

impl Transport {
    pub fn protocol(&self) -> Protocol {
        match self {
            Transport::Stream(_) => Protocol::Tcp,
            Transport::Packet(_) => Protocol::Udp,
        }
    }

    /// Fixed remote peer of the connection, if it has one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Transport::Stream(stream) => stream.peer_addr(),
            Transport::Packet(socket) => socket.peer_addr().ok(),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("protocol", &self.protocol())
            .field("peer_addr", &self.peer_addr())
            .finish()
    }
}

/// A listening endpoint, tagged with its transport kind
pub enum Listener {
    Stream(Box<dyn StreamListener>),
    /// Datagram sockets do not accept; the socket itself is the session
    Packet(UdpSocket),
}

impl Listener {
    pub fn protocol(&self) -> Protocol {
        match self {
            Listener::Stream(_) => Protocol::Tcp,
            Listener::Packet(_) => Protocol::Udp,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Stream(listener) => listener.local_addr(),
            Listener::Packet(socket) => socket.local_addr(),
        }
    }
}

/// Supplier of `dial` and `listen` operations
///
/// Implementations may be backed by plain sockets or by a tunneled virtual
/// network; callers only depend on this trait.
pub trait TransportProvider: Send + Sync + 'static {
    /// Open a connection to `address`
    fn dial<'a>(
        &'a self,
        protocol: Protocol,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Transport, RelayError>>;

    /// Open a listening endpoint at `address`
    fn listen<'a>(
        &'a self,
        protocol: Protocol,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Listener, RelayError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("sctp".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }
}
