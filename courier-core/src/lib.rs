//! # courier-core
//!
//! Core types shared by every courier crate:
//!
//! - **Addressing**: [`Endpoint`] and [`EndpointPattern`]
//! - **Envelopes**: [`Envelope`], [`EnvelopeId`], [`Content`], [`Fault`]
//! - **Messages**: the [`Message`] trait and its serialized [`Payload`]
//! - **Codec trait**: pluggable envelope serialization ([`MessageCodec`], [`JsonCodec`])

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod endpoint;
mod envelope;
mod message;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use endpoint::{Endpoint, EndpointParseError, EndpointPattern, WILDCARD};
pub use envelope::{Content, Envelope, EnvelopeId, Fault, FaultKind};
pub use message::{Message, Payload, type_key};
