//! # courier
//!
//! Request/reply message broker with pluggable routers.
//!
//! - **Broker**: [`Broker`] builds envelopes, tries routers in priority
//!   order and correlates replies through its [`PendingRequests`] table
//! - **Processing**: [`processor::MessageProcessor`] resolves one handler per
//!   message type and runs it inside an ordered filter pipeline
//! - **Routing**: [`routing::InProcessRouter`] for the local instance,
//!   [`routing::DuplexRouter`] over any duplex transport, and
//!   [`routing::PipeRouter`] over OS pipes
//!
//! Core types from `courier-core` are re-exported at the root.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod broker;
pub mod processor;
pub mod routing;
pub mod telemetry;

pub use broker::{
    Broker, BrokerBuilder, BrokerConfig, BrokerError, DispatchOptions, PendingRequests,
    RouteAttempt,
};
pub use courier_core::{
    Content, Endpoint, EndpointPattern, Envelope, EnvelopeId, Fault, FaultKind, Message, Payload,
};
pub use courier_transport as transport;

/// Error type returned by handlers and filters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
