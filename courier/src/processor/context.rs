//! Per-request state shared by filters and the handler.

use std::collections::HashMap;

use courier_core::{Endpoint, Fault, Payload};
use tokio_util::sync::CancellationToken;

/// Where a request is in the processing pipeline.
///
/// `Created → BeforeHooks → Handler → AfterHooks → Completed | Faulted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Context built, handler being resolved.
    Created,
    /// Running before-hooks, highest priority first.
    BeforeHooks,
    /// Running the handler.
    Handler,
    /// Running after-hooks in reverse start order.
    AfterHooks,
    /// Finished with a reply.
    Completed,
    /// Finished with a fault.
    Faulted,
}

/// State of one request as it moves through the pipeline.
///
/// Filters may read the request, inspect or replace the reply, attach
/// string properties for later hooks, and observe the captured fault in
/// their after-hook.
#[derive(Debug)]
pub struct ProcessingContext {
    request: Payload,
    sender: Option<Endpoint>,
    stage: ProcessingStage,
    fault: Option<Fault>,
    reply: Option<Payload>,
    properties: HashMap<String, String>,
    cancel: CancellationToken,
}

impl ProcessingContext {
    pub(crate) fn new(request: Payload, cancel: CancellationToken) -> Self {
        Self {
            request,
            sender: None,
            stage: ProcessingStage::Created,
            fault: None,
            reply: None,
            properties: HashMap::new(),
            cancel,
        }
    }

    /// The request payload.
    pub fn request(&self) -> &Payload {
        &self.request
    }

    /// Type key of the request.
    pub fn type_key(&self) -> &str {
        self.request.type_key()
    }

    /// Endpoint that sent the request, when it came through a router.
    pub fn sender(&self) -> Option<&Endpoint> {
        self.sender.as_ref()
    }

    /// Record the endpoint that sent the request.
    pub fn set_sender(&mut self, sender: Endpoint) {
        self.sender = Some(sender);
    }

    /// Current pipeline stage.
    pub fn stage(&self) -> ProcessingStage {
        self.stage
    }

    pub(crate) fn set_stage(&mut self, stage: ProcessingStage) {
        self.stage = stage;
    }

    /// The first fault captured so far.
    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Keep the first fault; later ones are only logged by the caller.
    pub(crate) fn record_fault(&mut self, fault: Fault) {
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    /// The reply produced by the handler, if any.
    pub fn reply(&self) -> Option<&Payload> {
        self.reply.as_ref()
    }

    /// Replace the reply.
    pub fn set_reply(&mut self, reply: Payload) {
        self.reply = Some(reply);
    }

    pub(crate) fn take_reply(&mut self) -> Option<Payload> {
        self.reply.take()
    }

    /// Look up a property set by an earlier hook.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Set a property visible to later hooks and the handler.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// The request's cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
