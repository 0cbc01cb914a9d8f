use std::time::Duration;

use thiserror::Error;

/// Possible errors for the package.
#[derive(Error, Debug)]
pub enum RconError {
    /// Returned if the host is down or behind a firewall.
    #[error("host cannot be reached")]
    UnreachableHost(#[source] std::io::Error),
    /// Returned if the TCP handshake did not finish within the connect timeout.
    #[error("timed out connecting to host after {0:?}")]
    ConnectTimeout(Duration),
    /// The stream was established, but there was a problem writing to the
    /// socket. The client is dead after this.
    #[error("cannot send message to host")]
    SendError(#[source] std::io::Error),
    /// The stream was established, but there was a problem reading from the
    /// socket. The client is dead after this.
    #[error("cannot receive response from host")]
    ReceiveError(#[source] std::io::Error),
    /// The peer closed the connection, or the client was already closed.
    #[error("connection closed")]
    ConnectionClosed,
    /// The server did not answer in time. The request is still outstanding
    /// and the client remains usable.
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    /// The sequence counter wrapped around and a newer request took over this
    /// sequence before its response arrived.
    #[error("sequence {0} was reallocated while still waiting")]
    SequenceReused(u32),
    /// Returned if a buffer is too short for the field being read.
    #[error("packet truncated: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
    /// Returned if the size or word fields of a packet contradict each other.
    #[error("malformed packet: {reason}")]
    MalformedPacket { reason: String },
    /// Returned if a command line has unbalanced quotes or escapes.
    #[error("cannot tokenize command line: {0:?}")]
    InvalidCommandLine(String),
    /// Returned if a command has no words at all.
    #[error("empty command")]
    EmptyCommand,
    /// Returned if the server's login salt is missing or not hex.
    #[error("invalid login salt: {0:?}")]
    InvalidSalt(String),
}

impl RconError {
    /// `true` for the "no answer" result of an invoke.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RconError::Timeout(_))
    }

    /// `true` if the error ended (or found ended) a live connection.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            RconError::SendError(_) | RconError::ReceiveError(_) | RconError::ConnectionClosed
        )
    }

    /// `true` if the bytes on the wire could not be decoded.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            RconError::Truncated { .. } | RconError::MalformedPacket { .. }
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        RconError::MalformedPacket {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RconError>;
