//! relaycat Library
//!
//! Netcat-style relay engine: moves bytes between local endpoints and a
//! remote peer over TCP or UDP, and relays many concurrent inbound TCP
//! connections to a fixed target in proxy mode.

pub mod config;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod runner;
pub mod shutdown;
pub mod transport;

pub use config::Config;
pub use error::RelayError;
pub use proxy::{serve_proxy, serve_proxy_until, ProxyDispatcher};
pub use relay::{PacketRelay, Progress, SessionReport, StreamRelay};
pub use shutdown::ShutdownCoordinator;
pub use transport::{Endpoint, Protocol, SystemTransport, Transport, TransportProvider};

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
