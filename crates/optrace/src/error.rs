//! Error types for the event transport.

use thiserror::Error;

/// Errors raised while moving events or control messages between processes.
///
/// A transport error never invalidates events that were already handed to
/// the peer; it only means nothing further can be delivered.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The other end of the channel has gone away
    #[error("channel closed")]
    Closed,

    /// Writing to or reading from the underlying stream failed
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded or decoded
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
