//! Codec error types.

use std::time::Duration;

use hdb_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the framing layer.
///
/// Every variant means the transport can no longer be trusted; callers map
/// them to a bad-connection error and drop the session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// IO error on the transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be framed or parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A read or write exceeded the transport deadline.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Configured deadline.
        elapsed: Duration,
    },

    /// Message larger than the configured limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Announced size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection was canceled while an operation was in flight.
    #[error("connection canceled")]
    Canceled,

    /// The connection was marked bad by an earlier failure.
    #[error("connection is marked bad")]
    Bad,
}

impl CodecError {
    /// Whether the error was caused by cancellation rather than the peer.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
