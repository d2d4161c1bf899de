//! Data Relay Module
//!
//! Moves bytes between a connection and a pair of local endpoints. Each
//! direction runs as its own task; whichever finishes first closes the
//! connection, and that close is what stops the other direction.

pub mod packet;
pub mod progress;
pub mod stream;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::transport::Transport;

pub use packet::PacketRelay;
pub use progress::{Direction, Progress, SessionReport, Termination};
pub use stream::StreamRelay;

/// In-band datagram payload that ends a datagram session
pub const DISCONNECT_MARKER: &[u8] = b"~.";

/// Large enough for a full-size UDP datagram or TCP segment in one read
pub const DATAGRAM_BUFFER_SIZE: usize = u16::MAX as usize;

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_DATAGRAM_PAYLOAD: usize = 65507;

pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 32 * 1024;

/// Whether a datagram payload is exactly the disconnect marker
///
/// Shorter or longer payloads, including ones that merely start with the
/// marker, are ordinary data.
pub fn is_disconnect_marker(payload: &[u8]) -> bool {
    payload == DISCONNECT_MARKER
}

/// Closing side of a session's connection
///
/// Both directions hold a clone. Calling [`CloseSignal::close`] makes every
/// read or write the other direction has in flight on the connection fail
/// with [`Termination::Closed`] on its next poll.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    token: CancellationToken,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

pub(crate) fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Relay an established connection with the given local endpoints,
/// choosing the stream or packet relay from the transport's tag
pub async fn run<R, W>(
    transport: Transport,
    reader: R,
    writer: W,
    config: &RelayConfig,
) -> SessionReport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    match transport {
        Transport::Stream(stream) => {
            StreamRelay::from_config(config)
                .relay(stream, reader, writer)
                .await
        }
        Transport::Packet(socket) => {
            PacketRelay::from_config(config)
                .relay(socket, reader, writer)
                .await
        }
    }
}
