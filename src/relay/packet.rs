//! Packet Relay
//!
//! Datagram copier for connectionless transports. A dialed socket already
//! knows its peer; a listening socket learns it from the first datagram it
//! receives and keeps replying there for the rest of the session. Datagram
//! transports have no close signal, so a datagram carrying exactly
//! [`DISCONNECT_MARKER`] ends the session instead.
//!
//! [`DISCONNECT_MARKER`]: super::DISCONNECT_MARKER

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{
    is_disconnect_marker, new_session_id, CloseSignal, Direction, Progress, SessionReport,
    Termination, DATAGRAM_BUFFER_SIZE, MAX_DATAGRAM_PAYLOAD,
};
use crate::config::RelayConfig;

/// Relays datagrams between a UDP socket and local reader/writer
#[derive(Debug, Clone)]
pub struct PacketRelay {
    buffer_size: usize,
}

impl Default for PacketRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRelay {
    /// Create a new packet relay
    pub fn new() -> Self {
        Self {
            buffer_size: DATAGRAM_BUFFER_SIZE,
        }
    }

    /// Create a new packet relay from configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            buffer_size: config.datagram_buffer_size.max(DATAGRAM_BUFFER_SIZE),
        }
    }

    /// Relay `socket` with `reader` (local input) and `writer` (local output)
    ///
    /// The receive direction starts first. When the socket is not connected
    /// the send direction waits until the receive direction has learned the
    /// peer address, and every outbound datagram is addressed to it.
    pub async fn relay<R, W>(&self, socket: UdpSocket, reader: R, writer: W) -> SessionReport
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.relay_with_close(socket, reader, writer, CloseSignal::new())
            .await
    }

    /// Relay with a caller-supplied close signal; closing it ends both
    /// directions as if one of them had finished
    pub(crate) async fn relay_with_close<R, W>(
        &self,
        socket: UdpSocket,
        reader: R,
        writer: W,
        close: CloseSignal,
    ) -> SessionReport
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = new_session_id();
        let span = info_span!("packet_session", session_id = %session_id);
        let socket = Arc::new(socket);
        let connected_peer = socket.peer_addr().ok();
        let (report_tx, mut report_rx) = mpsc::channel(2);

        let (learned_tx, learned_rx) = match connected_peer {
            Some(_) => (None, None),
            None => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
        };

        let receiver = DatagramReceiver {
            socket: Arc::clone(&socket),
            remote_addr: connected_peer,
            learned: learned_tx,
            buffer_size: self.buffer_size,
            close: close.clone(),
            report: report_tx.clone(),
        };
        tokio::spawn(receiver.run(writer).instrument(span.clone()));

        let remote_addr = match learned_rx {
            None => connected_peer,
            Some(rx) => match rx.await {
                Ok(addr) => {
                    span.in_scope(|| info!("[{}]: Datagram has been received", addr));
                    Some(addr)
                }
                // The receive direction ended before any datagram arrived
                Err(_) => None,
            },
        };

        match remote_addr {
            Some(remote_addr) => {
                if let Some(addr) = connected_peer {
                    span.in_scope(|| info!("Sending datagrams to {}", addr));
                }
                let sender = DatagramSender {
                    socket,
                    remote_addr,
                    connected: connected_peer.is_some(),
                    buffer_size: self.buffer_size.min(MAX_DATAGRAM_PAYLOAD),
                    close,
                    report: report_tx,
                };
                tokio::spawn(sender.run(reader).instrument(span.clone()));
            }
            None => {
                span.in_scope(|| info!("No datagram received, nothing has been sent"));
                let progress = Progress::new(Direction::Sent, 0, None, Termination::Closed);
                if report_tx.send(progress).await.is_err() {
                    debug!("Session coordinator went away before the report arrived");
                }
            }
        }

        let mut progress = Vec::with_capacity(2);
        while progress.len() < 2 {
            match report_rx.recv().await {
                Some(p) => progress.push(p),
                None => break,
            }
        }

        let report = SessionReport::new(session_id, progress);
        span.in_scope(|| report.log());
        report
    }
}

/// Receive direction: socket to local output
struct DatagramReceiver {
    socket: Arc<UdpSocket>,
    remote_addr: Option<SocketAddr>,
    /// Present until the peer address has been published
    learned: Option<oneshot::Sender<SocketAddr>>,
    buffer_size: usize,
    close: CloseSignal,
    report: mpsc::Sender<Progress>,
}

impl DatagramReceiver {
    async fn run<W>(mut self, mut writer: W)
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::zeroed(self.buffer_size);
        let mut bytes: u64 = 0;

        let termination = loop {
            let (n, from) = tokio::select! {
                biased;
                _ = self.close.closed() => break Termination::Closed,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(remote_addr = ?self.remote_addr, error = %e, "Receive error, stopping this direction");
                        break Termination::ReadError(e.to_string());
                    }
                },
            };

            match self.remote_addr {
                None => {
                    self.remote_addr = Some(from);
                    if let Some(learned) = self.learned.take() {
                        let _ = learned.send(from);
                    }
                }
                Some(addr) if addr != from => {
                    debug!(
                        "Datagram from {} while replying to {}, reply target unchanged",
                        from, addr
                    );
                }
                Some(_) => {}
            }

            let payload = &buf[..n];
            if is_disconnect_marker(payload) {
                info!("[{}]: Disconnect marker received", from);
                break Termination::Disconnect;
            }

            let write = async {
                writer.write_all(payload).await?;
                writer.flush().await
            };
            tokio::select! {
                biased;
                _ = self.close.closed() => break Termination::Closed,
                written = write => {
                    if let Err(e) = written {
                        error!(error = %e, "Write to local output failed, aborting session");
                        break Termination::WriteError(e.to_string());
                    }
                }
            }
            bytes += n as u64;
        };

        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Shutdown of local output failed");
        }
        self.close.close();

        match self.remote_addr {
            Some(addr) => info!(
                "[{}]: Stop receiving flow ({}), {} bytes has been received",
                addr, termination, bytes
            ),
            None => info!("Stop receiving flow before any datagram ({})", termination),
        }

        let progress = Progress::new(Direction::Received, bytes, self.remote_addr, termination);
        if self.report.send(progress).await.is_err() {
            debug!("Session coordinator went away before the report arrived");
        }
    }
}

/// Send direction: local input to socket
struct DatagramSender {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    /// Connected sockets use a plain send; unbound ones must address each datagram
    connected: bool,
    buffer_size: usize,
    close: CloseSignal,
    report: mpsc::Sender<Progress>,
}

impl DatagramSender {
    async fn run<R>(self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::zeroed(self.buffer_size);
        let mut bytes: u64 = 0;

        let termination = loop {
            let n = tokio::select! {
                biased;
                _ = self.close.closed() => break Termination::Closed,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break Termination::EndOfInput,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "Local read error, stopping this direction");
                        break Termination::ReadError(e.to_string());
                    }
                },
            };

            let chunk = &buf[..n];
            if is_disconnect_marker(chunk) {
                info!("[{}]: Disconnect requested by local peer", self.remote_addr);
                break Termination::Disconnect;
            }

            let send = async {
                if self.connected {
                    self.socket.send(chunk).await
                } else {
                    self.socket.send_to(chunk, self.remote_addr).await
                }
            };
            let sent = tokio::select! {
                biased;
                _ = self.close.closed() => break Termination::Closed,
                sent = send => sent,
            };
            match sent {
                Ok(sent) => bytes += sent as u64,
                Err(e) => {
                    error!(remote_addr = %self.remote_addr, error = %e, "Send error, aborting session");
                    break Termination::WriteError(e.to_string());
                }
            }
        };

        self.close.close();
        info!(
            "[{}]: Local peer has been stopped ({}), {} bytes has been sent",
            self.remote_addr, termination, bytes
        );

        let progress = Progress::new(Direction::Sent, bytes, Some(self.remote_addr), termination);
        if self.report.send(progress).await.is_err() {
            debug!("Session coordinator went away before the report arrived");
        }
    }
}
