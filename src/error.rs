//! Transport Errors
//!
//! Failures raised while establishing connections. Failures that happen
//! while bytes are already flowing are reported as a [`Termination`]
//! on the direction that observed them instead.
//!
//! [`Termination`]: crate::relay::Termination

use std::io;
use std::time::Duration;

use crate::transport::Protocol;

/// Errors produced by transport providers and the components that drive them
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("failed to dial {protocol} {address}: {source}")]
    Dial {
        protocol: Protocol,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("dialing {address} timed out after {timeout:?}")]
    DialTimeout { address: String, timeout: Duration },

    #[error("failed to listen on {protocol} {address}: {source}")]
    Listen {
        protocol: Protocol,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept inbound connection: {0}")]
    Accept(#[source] io::Error),

    #[error("address {address} did not resolve to any socket address")]
    Resolve { address: String },

    #[error("{operation} over {protocol} is not supported by this transport")]
    UnsupportedTransport {
        protocol: Protocol,
        operation: &'static str,
    },
}

impl RelayError {
    /// Whether the error came from reaching the remote side rather than
    /// from a local socket operation
    pub fn is_dial_failure(&self) -> bool {
        matches!(
            self,
            RelayError::Dial { .. } | RelayError::DialTimeout { .. } | RelayError::Resolve { .. }
        )
    }
}
