//! Router base for transports that both send and receive.
//!
//! Outbound envelopes go straight to the transport. Inbound envelopes are
//! classified by [`DuplexRouter::route_input`]:
//!
//! ```text
//! reply_to set ─────────► ReplySink (broker completes the pending request)
//! one-way request ──────► MessageProcessor, no reply
//! two-way request ──────► MessageProcessor ─► reply envelope ─► transport
//! ```

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use courier_core::{Content, Envelope, Fault, FaultKind};
use courier_transport::{DuplexTransport, InboundReceiver};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{MessageRouter, ReplySink, RouteError, RouterKind};
use crate::processor::MessageProcessor;

struct DuplexInner<T: DuplexTransport> {
    name: String,
    transport: T,
    processor: Arc<MessageProcessor>,
    reply_sink: OnceLock<ReplySink>,
    shutdown: CancellationToken,
}

impl<T: DuplexTransport> DuplexInner<T> {
    async fn route_input(&self, envelope: Envelope) {
        let arrived = Instant::now();
        if envelope.is_reply() {
            match self.reply_sink.get() {
                Some(sink) => {
                    let id = envelope.id();
                    if !sink.deliver(envelope) {
                        tracing::debug!("{}: reply {} matched no pending request", self.name, id);
                    }
                }
                None => tracing::warn!(
                    "{}: dropping reply {}, no broker attached",
                    self.name,
                    envelope.id()
                ),
            }
            return;
        }

        let result = match envelope.content() {
            Content::Message(payload) => {
                let sender = envelope.sender().clone();
                self.processor
                    .process(
                        payload.clone(),
                        |ctx| ctx.set_sender(sender),
                        &self.shutdown.child_token(),
                    )
                    .await
                    .map_err(|e| e.to_fault())
            }
            Content::Fault(_) => Err(Fault::new(
                FaultKind::Processing,
                "request carried a fault instead of a message",
            )),
        };

        if envelope.is_one_way() {
            if let Err(fault) = result {
                tracing::debug!(
                    "{}: one-way {} failed: {}",
                    self.name,
                    envelope.id(),
                    fault
                );
            }
            return;
        }

        let content = match result {
            Ok(payload) => Content::Message(payload),
            Err(fault) => Content::Fault(fault),
        };
        let reply = Envelope::reply(&envelope, content);
        // The requester stops waiting one timeout after sending; processing
        // time already counts against it.
        let deadline = arrived + envelope.timeout();
        if let Err(e) = self.transport.send(&reply, deadline, &self.shutdown).await {
            tracing::warn!(
                "{}: failed to send reply to {} for {}: {}",
                self.name,
                reply.recipient(),
                envelope.id(),
                e
            );
        }
    }
}

/// Router over any [`DuplexTransport`].
///
/// Construction claims the transport's inbound stream and spawns the inbound
/// loop, so it must happen inside a Tokio runtime. Each inbound envelope is
/// handled on its own task; replies are matched by id, never by order.
pub struct DuplexRouter<T: DuplexTransport> {
    inner: Arc<DuplexInner<T>>,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: DuplexTransport> DuplexRouter<T> {
    /// Build a router over `transport`, delivering requests to `processor`.
    ///
    /// # Errors
    ///
    /// Returns `InboundTaken` if something already claimed the transport's
    /// inbound stream.
    pub fn new(transport: T, processor: Arc<MessageProcessor>) -> Result<Self, RouteError> {
        let name = transport.name().to_string();
        let inbound = transport
            .take_inbound()
            .ok_or_else(|| RouteError::InboundTaken(name.clone()))?;

        let inner = Arc::new(DuplexInner {
            name,
            transport,
            processor,
            reply_sink: OnceLock::new(),
            shutdown: CancellationToken::new(),
        });
        let inbound_task = tokio::spawn(inbound_loop(Arc::clone(&inner), inbound));

        Ok(Self {
            inner,
            inbound_task: Mutex::new(Some(inbound_task)),
        })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Classify and handle one inbound envelope.
    pub async fn route_input(&self, envelope: Envelope) {
        self.inner.route_input(envelope).await;
    }

    /// Stop the inbound loop and close the transport.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.transport.close().await;

        let task = self
            .inbound_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("{}: inbound loop failed: {}", self.inner.name, e);
            }
        }
    }
}

impl<T: DuplexTransport> Drop for DuplexRouter<T> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

async fn inbound_loop<T: DuplexTransport>(inner: Arc<DuplexInner<T>>, mut inbound: InboundReceiver) {
    loop {
        let envelope = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            envelope = inbound.recv() => envelope,
        };
        let Some(envelope) = envelope else {
            tracing::debug!("{}: inbound stream ended", inner.name);
            break;
        };

        let inner = Arc::clone(&inner);
        tokio::spawn(async move { inner.route_input(envelope).await });
    }
}

#[async_trait]
impl<T: DuplexTransport> MessageRouter for DuplexRouter<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> RouterKind {
        RouterKind::Duplex
    }

    fn attach_reply_sink(&self, sink: ReplySink) {
        if self.inner.reply_sink.set(sink).is_err() {
            tracing::warn!("{}: reply sink already attached, keeping the first", self.inner.name);
        }
    }

    async fn route_output(
        &self,
        envelope: &Envelope,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Option<Envelope>, RouteError> {
        self.inner.transport.send(envelope, deadline, cancel).await?;
        Ok(None)
    }
}
