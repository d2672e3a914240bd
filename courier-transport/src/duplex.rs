//! The transport seam shared by every duplex router.

use async_trait::async_trait;
use courier_core::Envelope;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::TransportResult;

/// Receiver of envelopes arriving from a transport.
///
/// Taken once by the router that owns the transport via
/// [`DuplexTransport::take_inbound`].
pub type InboundReceiver = mpsc::UnboundedReceiver<Envelope>;

/// A channel that both sends and receives envelopes.
///
/// Outbound: [`send`](DuplexTransport::send) writes one envelope, retrying
/// transient unavailability until `deadline`.
/// Inbound: every envelope read from the channel is pushed to the receiver
/// returned by [`take_inbound`](DuplexTransport::take_inbound).
#[async_trait]
pub trait DuplexTransport: Send + Sync + 'static {
    /// Short transport name used in logs.
    fn name(&self) -> &str;

    /// Take ownership of the inbound envelope stream.
    ///
    /// Returns `None` if it was already taken.
    fn take_inbound(&self) -> Option<InboundReceiver>;

    /// Send one envelope.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` if no link could carry the envelope before
    /// `deadline`, `Canceled` if `cancel` fired first, `Closed` after
    /// [`close`](DuplexTransport::close).
    async fn send(
        &self,
        envelope: &Envelope,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> TransportResult<()>;

    /// Stop background tasks and drop all links.
    async fn close(&self);
}
