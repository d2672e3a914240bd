//! Error types for transport operations.

use std::io;

use crate::WireError;

/// Errors that can occur while moving envelopes over a duplex transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The target could not be reached right now.
    #[error("target {target} unavailable: {reason}")]
    Unavailable {
        /// Instance or channel that was targeted.
        target: String,
        /// Why the target is unavailable.
        reason: String,
    },

    /// The envelope's remaining timeout elapsed before it could be written.
    #[error("deadline exceeded while sending to {target}")]
    DeadlineExceeded {
        /// Instance or channel that was targeted.
        target: String,
    },

    /// The caller canceled the send.
    #[error("send canceled")]
    Canceled,

    /// The transport was closed.
    #[error("transport closed")]
    Closed,

    /// Framing error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A peer opened a link without a valid `Hello` frame.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Envelope could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

impl From<courier_core::CodecError> for TransportError {
    fn from(error: courier_core::CodecError) -> Self {
        TransportError::Codec(error.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
