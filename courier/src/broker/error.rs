//! Errors surfaced by broker dispatch.

use std::time::Duration;

use courier_core::{CodecError, Endpoint, EnvelopeId, Fault, FaultKind};

/// One router's reason for not taking an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAttempt {
    /// Router name.
    pub router: String,
    /// Why it declined.
    pub reason: String,
}

fn describe_attempts(attempts: &[RouteAttempt]) -> String {
    if attempts.is_empty() {
        return "no eligible routers".to_string();
    }
    attempts
        .iter()
        .map(|attempt| format!("{}: {}", attempt.router, attempt.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by [`Broker`](super::Broker) dispatch.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The receiving side has no handler for the message type.
    #[error("missing handler: {0}")]
    MissingHandler(String),

    /// A handler or filter failed on the receiving side.
    #[error("processing fault: {0}")]
    ProcessingFault(String),

    /// Every eligible router declined or failed.
    #[error("no route found for {recipient} ({})", describe_attempts(.attempts))]
    NoRouteFound {
        /// The envelope's recipient.
        recipient: Endpoint,
        /// What each attempted router reported, in order.
        attempts: Vec<RouteAttempt>,
    },

    /// No reply arrived within the timeout.
    #[error("request {id} timed out after {timeout:?}")]
    Timeout {
        /// Request id.
        id: EnvelopeId,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The caller canceled the dispatch.
    #[error("dispatch canceled")]
    Canceled,

    /// The broker was shut down.
    #[error("broker shut down")]
    Shutdown,

    /// Options that cannot be honored by the called method.
    #[error("invalid dispatch options: {0}")]
    InvalidOptions(&'static str),

    /// The message or reply could not be (de)serialized.
    #[error("payload error: {0}")]
    Codec(#[from] CodecError),
}

impl From<Fault> for BrokerError {
    fn from(fault: Fault) -> Self {
        match fault.kind {
            FaultKind::MissingHandler => BrokerError::MissingHandler(fault.message),
            FaultKind::Processing | FaultKind::Canceled => BrokerError::ProcessingFault(fault.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_route_lists_every_attempt() {
        let error = BrokerError::NoRouteFound {
            recipient: Endpoint::new("app", "w1"),
            attempts: vec![
                RouteAttempt {
                    router: "in-process:app/root".into(),
                    reason: "not served".into(),
                },
                RouteAttempt {
                    router: "pipe:app.root".into(),
                    reason: "deadline exceeded".into(),
                },
            ],
        };
        assert_eq!(
            error.to_string(),
            "no route found for app/w1 (in-process:app/root: not served; pipe:app.root: deadline exceeded)"
        );
    }

    #[test]
    fn test_fault_mapping() {
        let missing: BrokerError = Fault::new(FaultKind::MissingHandler, "no handler").into();
        assert!(matches!(missing, BrokerError::MissingHandler(_)));

        let remote_cancel: BrokerError = Fault::new(FaultKind::Canceled, "stopped").into();
        assert!(matches!(remote_cancel, BrokerError::ProcessingFault(_)));
    }
}
