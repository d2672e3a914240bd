//! # courier-transport
//!
//! Duplex transports for courier routers.
//!
//! - **Wire format**: length-prefixed, CRC32C-checked frames ([`wire`])
//! - **Transport seam**: the [`DuplexTransport`] trait every duplex router drives
//! - **Pipes**: [`PipeTransport`] over unix sockets or Windows named pipes
//! - **Memory**: [`MemoryTransport`] pairs for tests and embedded use

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod duplex;
mod error;
mod memory;
pub mod pipe;
pub mod wire;

pub use duplex::{DuplexTransport, InboundReceiver};
pub use error::{TransportError, TransportResult};
pub use memory::{MemoryMode, MemoryTransport};
pub use pipe::{ChannelName, PipeConfig, PipeMetrics, PipeTransport};
pub use wire::{
    FrameHeader, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE, WireError, deserialize_frame,
    serialize_frame, try_deserialize_frame,
};
