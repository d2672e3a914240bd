//! Result of a router's outbound attempt.

use courier_core::Envelope;

/// What the broker should do after offering an envelope to a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteInstruction {
    /// The router accepted the envelope.
    Handled,
    /// The router does not serve this recipient; try the next one.
    RetryWithDifferentRouter,
    /// The router serves the recipient but could not deliver right now.
    RouteNotAvailable,
}

/// Outcome of [`MessageRouter::dispatch`](super::MessageRouter::dispatch).
///
/// Only a `Handled` outcome can carry an immediate reply.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    instruction: RouteInstruction,
    reply: Option<Envelope>,
    reason: Option<String>,
}

impl RoutingOutcome {
    /// Accepted; any reply will arrive asynchronously.
    pub fn handled() -> Self {
        Self {
            instruction: RouteInstruction::Handled,
            reply: None,
            reason: None,
        }
    }

    /// Accepted and answered without a transport hop.
    pub fn handled_with_reply(reply: Envelope) -> Self {
        Self {
            reply: Some(reply),
            ..Self::handled()
        }
    }

    /// Not this router's recipient.
    pub fn retry_with_different_router(reason: impl Into<String>) -> Self {
        Self {
            instruction: RouteInstruction::RetryWithDifferentRouter,
            reply: None,
            reason: Some(reason.into()),
        }
    }

    /// Delivery failed.
    pub fn route_not_available(reason: impl Into<String>) -> Self {
        Self {
            instruction: RouteInstruction::RouteNotAvailable,
            reply: None,
            reason: Some(reason.into()),
        }
    }

    /// The instruction.
    pub fn instruction(&self) -> RouteInstruction {
        self.instruction
    }

    /// Whether the envelope was accepted.
    pub fn is_handled(&self) -> bool {
        self.instruction == RouteInstruction::Handled
    }

    /// The immediate reply, if any.
    pub fn reply(&self) -> Option<&Envelope> {
        self.reply.as_ref()
    }

    /// Consume the outcome, keeping the immediate reply.
    pub fn into_reply(self) -> Option<Envelope> {
        self.reply
    }

    /// Why the router declined, for anything but `Handled`.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}
