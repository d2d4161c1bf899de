//! Stream Relay
//!
//! Full-duplex copier for connection-oriented transports.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{
    new_session_id, CloseSignal, Direction, Progress, SessionReport, Termination,
    DEFAULT_STREAM_BUFFER_SIZE,
};
use crate::config::RelayConfig;
use crate::transport::StreamConnection;

/// Relays bytes between a stream connection and local reader/writer
#[derive(Debug, Clone)]
pub struct StreamRelay {
    buffer_size: usize,
}

impl Default for StreamRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRelay {
    /// Create a new stream relay
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
        }
    }

    /// Create a new stream relay with a custom copy buffer
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Create a new stream relay from configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::with_buffer_size(config.stream_buffer_size)
    }

    /// Relay `connection` with `reader` (local input) and `writer` (local
    /// output) until both directions have finished
    ///
    /// Each direction closes the connection when it finishes, so the call
    /// returns as soon as either side is done and the other has observed the
    /// close. The report holds both progress records in completion order.
    pub async fn relay<C, R, W>(&self, connection: C, reader: R, writer: W) -> SessionReport
    where
        C: StreamConnection,
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = new_session_id();
        let remote_addr = connection.peer_addr();
        let span = info_span!("stream_session", session_id = %session_id);

        span.in_scope(|| match remote_addr {
            Some(addr) => info!("[{}]: Connection has been opened", addr),
            None => info!("Connection has been opened"),
        });

        let (conn_reader, conn_writer) = tokio::io::split(connection);
        let close = CloseSignal::new();
        let (report_tx, mut report_rx) = mpsc::channel(2);

        let inbound = DirectionalCopy {
            direction: Direction::Received,
            remote_addr,
            buffer_size: self.buffer_size,
            close: close.clone(),
            report: report_tx.clone(),
        };
        let outbound = DirectionalCopy {
            direction: Direction::Sent,
            remote_addr,
            buffer_size: self.buffer_size,
            close,
            report: report_tx,
        };

        tokio::spawn(inbound.run(conn_reader, writer).instrument(span.clone()));
        tokio::spawn(outbound.run(reader, conn_writer).instrument(span.clone()));

        let mut progress = Vec::with_capacity(2);
        while progress.len() < 2 {
            match report_rx.recv().await {
                Some(p) => progress.push(p),
                // A copy task panicked before reporting
                None => break,
            }
        }

        let report = SessionReport::new(session_id, progress);
        span.in_scope(|| report.log());
        report
    }
}

/// One direction of a stream session
struct DirectionalCopy {
    direction: Direction,
    remote_addr: Option<SocketAddr>,
    buffer_size: usize,
    close: CloseSignal,
    report: mpsc::Sender<Progress>,
}

impl DirectionalCopy {
    async fn run<R, W>(self, mut reader: R, mut writer: W)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.buffer_size];
        let mut bytes: u64 = 0;

        let termination = loop {
            let n = tokio::select! {
                biased;
                _ = self.close.closed() => break Termination::Closed,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break Termination::EndOfInput,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(direction = %self.direction, error = %e, "Read error, stopping this direction");
                        break Termination::ReadError(e.to_string());
                    }
                },
            };

            let write = async {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await
            };
            tokio::select! {
                biased;
                _ = self.close.closed() => break Termination::Closed,
                written = write => {
                    if let Err(e) = written {
                        error!(direction = %self.direction, error = %e, "Write error, aborting session");
                        break Termination::WriteError(e.to_string());
                    }
                }
            }
            bytes += n as u64;
        };

        if let Err(e) = writer.shutdown().await {
            debug!(direction = %self.direction, error = %e, "Shutdown of destination failed");
        }
        self.close.close();

        match (self.direction, self.remote_addr) {
            (Direction::Received, Some(addr)) => info!(
                "[{}]: Connection has been closed ({}), {} bytes has been received",
                addr, termination, bytes
            ),
            (Direction::Sent, Some(addr)) => info!(
                "[{}]: Local peer has been stopped ({}), {} bytes has been sent",
                addr, termination, bytes
            ),
            (direction, None) => info!(
                direction = %direction,
                bytes = bytes,
                "Direction stopped ({})",
                termination
            ),
        }

        let progress = Progress::new(self.direction, bytes, self.remote_addr, termination);
        if self.report.send(progress).await.is_err() {
            debug!("Session coordinator went away before the report arrived");
        }
    }
}
