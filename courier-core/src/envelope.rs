//! The routable wrapper around an application message.
//!
//! An [`Envelope`] is either a fresh request (`reply_to` unset) or a reply
//! answering exactly one earlier request. The constructors are the only way
//! to build one, so the two shapes cannot be mixed, and once built the
//! fields are read-only.
//!
//! ```text
//! request:  id=A  reply_to=None     sender=S recipient=R  content=Message
//! reply:    id=B  reply_to=Some(A)  sender=R recipient=S  content=Message|Fault
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Endpoint, Payload};

/// Unique envelope identifier (random v4 UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a fault carried back to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// No handler is registered for the request's type.
    MissingHandler,
    /// A handler or filter failed.
    Processing,
    /// Processing was canceled on the receiving side.
    Canceled,
}

/// A serializable description of a failed request.
///
/// Faults travel in reply envelopes so two-way dispatch failures always
/// reach the caller, whichever transport carried the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// What kind of failure occurred.
    pub kind: FaultKind,
    /// Human-readable description.
    pub message: String,
}

impl Fault {
    /// Create a fault.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}

/// What an envelope carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Content {
    /// An application message (request body or successful reply).
    Message(Payload),
    /// A converted processing failure (replies only).
    Fault(Fault),
}

/// Routable wrapper carrying a message plus correlation and addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    id: EnvelopeId,
    reply_to: Option<EnvelopeId>,
    one_way: bool,
    timeout: Duration,
    sender: Endpoint,
    recipient: Endpoint,
    content: Content,
}

impl Envelope {
    /// Build a fresh two-way request.
    pub fn request(
        payload: Payload,
        sender: Endpoint,
        recipient: Endpoint,
        timeout: Duration,
    ) -> Self {
        Self {
            id: EnvelopeId::new(),
            reply_to: None,
            one_way: false,
            timeout,
            sender,
            recipient,
            content: Content::Message(payload),
        }
    }

    /// Mark a request as one-way (no reply expected).
    ///
    /// Replies are never one-way; calling this on a reply returns it unchanged.
    pub fn into_one_way(mut self) -> Self {
        if self.reply_to.is_none() {
            self.one_way = true;
        }
        self
    }

    /// Build the reply answering `request`.
    ///
    /// The reply flows back to the request's sender and inherits its timeout.
    pub fn reply(request: &Envelope, content: Content) -> Self {
        Self {
            id: EnvelopeId::new(),
            reply_to: Some(request.id),
            one_way: false,
            timeout: request.timeout,
            sender: request.recipient.clone(),
            recipient: request.sender.clone(),
            content,
        }
    }

    /// Unique id of this envelope.
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    /// Id of the request this envelope answers, if it is a reply.
    pub fn reply_to(&self) -> Option<EnvelopeId> {
        self.reply_to
    }

    /// Whether this envelope is a reply.
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Whether no reply is expected.
    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    /// Bound on waiting for a reply.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Originating endpoint.
    pub fn sender(&self) -> &Endpoint {
        &self.sender
    }

    /// Destination endpoint.
    pub fn recipient(&self) -> &Endpoint {
        &self.recipient
    }

    /// Carried content.
    pub fn content(&self) -> &Content {
        &self.content
    }

    /// Type key of the carried message, if any.
    pub fn type_key(&self) -> Option<&str> {
        match &self.content {
            Content::Message(payload) => Some(payload.type_key()),
            Content::Fault(_) => None,
        }
    }

    /// Consume the envelope, returning its content.
    pub fn into_content(self) -> Content {
        self.content
    }
}
