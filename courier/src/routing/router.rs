//! The router seam between the broker and its transports.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Endpoint, Envelope};
use courier_transport::TransportError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::RoutingOutcome;

/// Errors returned by [`MessageRouter::route_output`].
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The router does not serve this recipient.
    #[error("recipient {recipient} is not served by this router")]
    NotForThisRouter {
        /// The envelope's recipient.
        recipient: Endpoint,
    },

    /// The transport failed to carry the envelope.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A request envelope carried a fault instead of a message.
    #[error("envelope {0} has no message to deliver")]
    NoMessage(String),

    /// The router's transport inbound stream was already claimed.
    #[error("inbound stream of {0} already taken")]
    InboundTaken(String),
}

/// Variants of router the broker can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterKind {
    /// Never leaves the process.
    InProcess,
    /// Sends and receives over a duplex transport.
    Duplex,
}

impl fmt::Display for RouterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterKind::InProcess => f.write_str("in-process"),
            RouterKind::Duplex => f.write_str("duplex"),
        }
    }
}

/// Reply-arrival callback a broker attaches to each of its routers.
///
/// Routers call [`deliver`](ReplySink::deliver) for every inbound envelope
/// whose `reply_to` is set; the return value tells whether a pending request
/// was completed.
#[derive(Clone)]
pub struct ReplySink(Arc<dyn Fn(Envelope) -> bool + Send + Sync>);

impl ReplySink {
    /// Wrap a callback.
    pub fn new(deliver: impl Fn(Envelope) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(deliver))
    }

    /// Hand a reply to the broker.
    pub fn deliver(&self, reply: Envelope) -> bool {
        (self.0)(reply)
    }
}

impl fmt::Debug for ReplySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplySink").finish_non_exhaustive()
    }
}

/// A transport plug-in the broker offers envelopes to.
#[async_trait]
pub trait MessageRouter: Send + Sync + 'static {
    /// Router name used in logs and `NoRouteFound` reports.
    fn name(&self) -> &str;

    /// Which variant this router is.
    fn kind(&self) -> RouterKind;

    /// Attach the broker's reply callback.
    fn attach_reply_sink(&self, sink: ReplySink);

    /// Deliver `envelope`, returning an immediate reply when one is produced
    /// without a transport hop.
    async fn route_output(
        &self,
        envelope: &Envelope,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Option<Envelope>, RouteError>;

    /// Offer `envelope` and classify the result for the broker.
    ///
    /// `NotForThisRouter` becomes *retry with a different router*; every
    /// other failure becomes *route not available*.
    async fn dispatch(
        &self,
        envelope: &Envelope,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> RoutingOutcome {
        match self.route_output(envelope, deadline, cancel).await {
            Ok(Some(reply)) => RoutingOutcome::handled_with_reply(reply),
            Ok(None) => RoutingOutcome::handled(),
            Err(e @ RouteError::NotForThisRouter { .. }) => {
                RoutingOutcome::retry_with_different_router(e.to_string())
            }
            Err(e) => {
                tracing::warn!(
                    "router {} could not deliver envelope {}: {}",
                    self.name(),
                    envelope.id(),
                    e
                );
                RoutingOutcome::route_not_available(e.to_string())
            }
        }
    }
}
