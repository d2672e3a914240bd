//! Per-call dispatch options.

use std::time::Duration;

use courier_core::Endpoint;

/// How one dispatch is addressed and bounded.
///
/// Unset fields fall back to the broker's configuration: the local endpoint
/// as recipient and the default timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Where to send the message.
    pub recipient: Option<Endpoint>,
    /// How long to wait for routing and the reply.
    pub timeout: Option<Duration>,
    /// Expect no reply.
    pub one_way: bool,
}

impl DispatchOptions {
    /// Options with every field defaulted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the message to `recipient`.
    pub fn to(mut self, recipient: Endpoint) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// Bound the dispatch by `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send without waiting for a reply.
    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }
}
