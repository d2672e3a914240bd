//! Router that never leaves the process.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use courier_core::{Content, Endpoint, Envelope};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{MessageRouter, ReplySink, RouteError, RouterKind};
use crate::processor::MessageProcessor;

/// Delivers envelopes addressed to the local instance straight to the
/// [`MessageProcessor`] and hands the reply back as an immediate reply.
///
/// Recipients on any other instance get *retry with a different router*.
/// One-way requests are processed on a spawned task and accepted at once.
pub struct InProcessRouter {
    name: String,
    local: Endpoint,
    processor: Arc<MessageProcessor>,
    reply_sink: OnceLock<ReplySink>,
}

impl InProcessRouter {
    /// Serve requests addressed to `local`'s instance.
    pub fn new(local: Endpoint, processor: Arc<MessageProcessor>) -> Self {
        Self {
            name: format!("in-process:{}/{}", local.application, local.instance),
            local,
            processor,
            reply_sink: OnceLock::new(),
        }
    }

    /// The endpoint this router answers for.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }
}

#[async_trait]
impl MessageRouter for InProcessRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RouterKind {
        RouterKind::InProcess
    }

    fn attach_reply_sink(&self, sink: ReplySink) {
        if self.reply_sink.set(sink).is_err() {
            tracing::warn!("{}: reply sink already attached, keeping the first", self.name);
        }
    }

    async fn route_output(
        &self,
        envelope: &Envelope,
        _deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Option<Envelope>, RouteError> {
        if !envelope.recipient().same_instance(&self.local) {
            return Err(RouteError::NotForThisRouter {
                recipient: envelope.recipient().clone(),
            });
        }

        if envelope.is_reply() {
            // A reply addressed to this instance completes a local request.
            if let Some(sink) = self.reply_sink.get() {
                sink.deliver(envelope.clone());
            }
            return Ok(None);
        }

        let Content::Message(payload) = envelope.content() else {
            return Err(RouteError::NoMessage(envelope.id().to_string()));
        };
        let payload = payload.clone();
        let sender = envelope.sender().clone();

        if envelope.is_one_way() {
            let processor = Arc::clone(&self.processor);
            let id = envelope.id();
            tokio::spawn(async move {
                let result = processor
                    .process(payload, |ctx| ctx.set_sender(sender), &CancellationToken::new())
                    .await;
                if let Err(e) = result {
                    tracing::debug!("one-way {} failed: {}", id, e);
                }
            });
            return Ok(None);
        }

        let content = match self
            .processor
            .process(payload, |ctx| ctx.set_sender(sender), cancel)
            .await
        {
            Ok(reply) => Content::Message(reply),
            Err(e) => Content::Fault(e.to_fault()),
        };
        Ok(Some(Envelope::reply(envelope, content)))
    }
}
