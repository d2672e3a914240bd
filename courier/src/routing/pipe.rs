//! Duplex router over an OS pipe.

use std::sync::Arc;

use courier_core::JsonCodec;
use courier_transport::{PipeConfig, PipeTransport};

use super::{DuplexRouter, RouteError};
use crate::processor::MessageProcessor;

/// Duplex router bound to a [`PipeTransport`].
pub type PipeRouter<C = JsonCodec> = DuplexRouter<PipeTransport<C>>;

impl DuplexRouter<PipeTransport<JsonCodec>> {
    /// Open a pipe transport for `config` and route over it.
    ///
    /// The root instance starts listening; any other instance starts
    /// connecting to the root in the background.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the root cannot bind its channel.
    pub fn pipe(config: PipeConfig, processor: Arc<MessageProcessor>) -> Result<Self, RouteError> {
        let transport = PipeTransport::open(config)?;
        Self::new(transport, processor)
    }
}
