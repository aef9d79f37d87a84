//! # Client Errors
//!
//! Purpose: Keep exhaustion, transport, protocol, and server failures as
//! separate statuses so callers can back off differently for each.

use std::io;

use respool_pool::PoolError;
use thiserror::Error;

/// Result type for the Redis client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Malformed or truncated reply framing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty reply line")]
    EmptyLine,
    #[error("reply line is not CRLF-terminated")]
    UnterminatedLine,
    #[error("unknown reply marker {0:#04x}")]
    UnknownMarker(u8),
    #[error("invalid integer `{0}`")]
    InvalidInteger(String),
    #[error("bulk reply declared {declared} bytes but carried {actual}")]
    BulkLength { declared: usize, actual: usize },
    #[error("length {0} exceeds the protocol limit")]
    TooLarge(i64),
    #[error("reply truncated: receive timed out mid-frame")]
    Truncated,
}

/// Errors surfaced by the Redis client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Borrowing a connection from the pool failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Network or IO failure while reading/writing.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// The transport accepted fewer bytes than the frame holds.
    #[error("short write: {written} of {expected} bytes sent")]
    ShortWrite { written: usize, expected: usize },
    #[error("not connected")]
    NotConnected,
    /// RESP framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The server stayed silent past the receive timeout.
    #[error("timed out waiting for reply: {message}")]
    Timeout { message: String },
    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server {
        kind: Option<String>,
        message: String,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid client configuration: {0}")]
    Config(String),
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// A pipeline and a transaction cannot share one connection.
    #[error("{0} is already active on this connection")]
    ModeConflict(&'static str),
    /// EXEC returned nil because a watched key changed.
    #[error("transaction aborted")]
    TransactionAborted,
}

impl ClientError {
    /// True when the connection's framing can no longer be trusted.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::ShortWrite { .. }
                | ClientError::NotConnected
                | ClientError::Protocol(_)
                | ClientError::Timeout { .. }
        )
    }
}
