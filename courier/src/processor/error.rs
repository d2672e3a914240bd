//! Errors raised while processing a request.

use courier_core::{CodecError, Fault, FaultKind};

/// Errors produced by [`MessageProcessor`](super::MessageProcessor).
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    /// No handler is registered for the request's type key.
    #[error("no handler registered for {type_key}")]
    MissingHandler {
        /// Type key of the unhandled request.
        type_key: String,
    },

    /// A handler or filter failed.
    #[error("processing {type_key} failed: {message}")]
    Faulted {
        /// Type key of the request being processed.
        type_key: String,
        /// The failure, rendered.
        message: String,
    },

    /// Cancellation was observed before the handler ran.
    #[error("processing canceled")]
    Canceled,

    /// The request or reply payload could not be (de)serialized.
    #[error("payload error: {0}")]
    Codec(#[from] CodecError),
}

impl ProcessingError {
    /// Serializable form carried back to the requester.
    pub fn to_fault(&self) -> Fault {
        let kind = match self {
            ProcessingError::MissingHandler { .. } => FaultKind::MissingHandler,
            ProcessingError::Canceled => FaultKind::Canceled,
            ProcessingError::Faulted { .. } | ProcessingError::Codec(_) => FaultKind::Processing,
        };
        Fault::new(kind, self.to_string())
    }
}
