//! Error taxonomy for the client.
//!
//! Transport failures are fatal to the connection and are never retried
//! here. Frame-level failures are recovered by the dispatcher and only show
//! up in logs.

use std::io;
use std::time::Duration;

/// Errors that can occur while talking to a receiver.
#[derive(Debug)]
pub enum ClientError {
    /// Failed to establish the TCP connection (refused, unresolvable, timed out).
    Connect {
        /// `host:port` that was dialled.
        addr: String,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Writing a frame to the transport failed.
    Send(io::Error),
    /// Reading from the transport failed.
    Receive(io::Error),
    /// Inbound bytes were not a valid envelope.
    MalformedFrame(String),
    /// The connection closed before a pending request could be answered.
    ConnectionLost,
    /// No reply arrived within the configured request timeout.
    Timeout(Duration),
}

impl ClientError {
    /// Whether this error means the connection can no longer be used.
    pub fn is_connection_level(&self) -> bool {
        !matches!(self, Self::MalformedFrame(_))
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect { addr, source } => write!(f, "Connect to {addr} failed: {source}"),
            Self::Send(e) => write!(f, "Send failed: {e}"),
            Self::Receive(e) => write!(f, "Receive failed: {e}"),
            Self::MalformedFrame(msg) => write!(f, "Malformed frame: {msg}"),
            Self::ConnectionLost => write!(f, "Connection lost"),
            Self::Timeout(after) => write!(f, "No reply after {}ms", after.as_millis()),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } => Some(source),
            Self::Send(e) | Self::Receive(e) => Some(e),
            _ => None,
        }
    }
}
