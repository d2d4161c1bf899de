//! Progress Reporting

use std::fmt;
use std::net::SocketAddr;

use tracing::info;

/// Which way a directional copy moved bytes, seen from the local side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local input to the remote peer
    Sent,
    /// Remote peer to local output
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => f.write_str("sent"),
            Direction::Received => f.write_str("received"),
        }
    }
}

/// Why a directional copy stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The source reached end of input
    EndOfInput,
    /// A datagram carrying exactly the disconnect marker was seen
    Disconnect,
    /// The connection was closed by the other direction
    Closed,
    /// Reading the source failed; only this direction ends
    ReadError(String),
    /// Writing the destination failed; the whole session is aborted
    WriteError(String),
}

impl Termination {
    /// Whether this termination aborts the session it belongs to
    pub fn is_fatal(&self) -> bool {
        matches!(self, Termination::WriteError(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::EndOfInput => f.write_str("end of input"),
            Termination::Disconnect => f.write_str("disconnect marker"),
            Termination::Closed => f.write_str("connection closed"),
            Termination::ReadError(e) => write!(f, "read error: {}", e),
            Termination::WriteError(e) => write!(f, "write error: {}", e),
        }
    }
}

/// Outcome of one completed directional copy
///
/// Created once when the copy finishes and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub bytes_transferred: u64,
    pub direction: Direction,
    pub remote_addr: Option<SocketAddr>,
    pub termination: Termination,
}

impl Progress {
    pub fn new(
        direction: Direction,
        bytes_transferred: u64,
        remote_addr: Option<SocketAddr>,
        termination: Termination,
    ) -> Self {
        Self {
            bytes_transferred,
            direction,
            remote_addr,
            termination,
        }
    }

    fn remote_label(&self) -> String {
        self.remote_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Both progress records of a finished relay session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    /// Records in the order their copies completed
    pub progress: Vec<Progress>,
}

impl SessionReport {
    pub fn new(session_id: String, progress: Vec<Progress>) -> Self {
        Self {
            session_id,
            progress,
        }
    }

    pub fn sent(&self) -> Option<&Progress> {
        self.find(Direction::Sent)
    }

    pub fn received(&self) -> Option<&Progress> {
        self.find(Direction::Received)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent().map_or(0, |p| p.bytes_transferred)
    }

    pub fn bytes_received(&self) -> u64 {
        self.received().map_or(0, |p| p.bytes_transferred)
    }

    pub fn total_bytes(&self) -> u64 {
        self.progress.iter().map(|p| p.bytes_transferred).sum()
    }

    /// Whether a write failure aborted the session
    pub fn aborted(&self) -> bool {
        self.progress.iter().any(|p| p.termination.is_fatal())
    }

    fn find(&self, direction: Direction) -> Option<&Progress> {
        self.progress.iter().find(|p| p.direction == direction)
    }

    /// Log the session summary
    pub fn log(&self) {
        for p in &self.progress {
            info!(
                session_id = %self.session_id,
                direction = %p.direction,
                bytes = p.bytes_transferred,
                remote_addr = %p.remote_label(),
                termination = %p.termination,
                "Direction finished"
            );
        }
        info!(
            session_id = %self.session_id,
            bytes_sent = self.bytes_sent(),
            bytes_received = self.bytes_received(),
            aborted = self.aborted(),
            "Session closed"
        );
    }
}
