//! Routers: the transport plug-ins a [`Broker`](crate::Broker) offers
//! envelopes to.
//!
//! - [`InProcessRouter`] answers requests for the local instance directly.
//! - [`DuplexRouter`] drives any [`DuplexTransport`](courier_transport::DuplexTransport)
//!   and answers inbound requests over the same transport.
//! - [`PipeRouter`] is the duplex router over an OS pipe.
//!
//! The broker tries eligible routers from a [`RouterRegistry`] in priority
//! order and reacts to each [`RoutingOutcome`].

mod duplex;
mod in_process;
mod outcome;
mod pipe;
mod registry;
mod router;

pub use duplex::DuplexRouter;
pub use in_process::InProcessRouter;
pub use outcome::{RouteInstruction, RoutingOutcome};
pub use pipe::PipeRouter;
pub use registry::RouterRegistry;
pub use router::{MessageRouter, ReplySink, RouteError, RouterKind};
