//! In-memory duplex transport.
//!
//! [`MemoryTransport::pair`] returns two connected ends. Every envelope is
//! still encoded and decoded through the codec, so routers see exactly what
//! a real transport would hand them. The [`MemoryMode`] of each end can be
//! switched at runtime to model a peer that is unreachable or that accepts
//! traffic and never answers.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use courier_core::{Envelope, JsonCodec, MessageCodec};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{DuplexTransport, InboundReceiver, TransportError, TransportResult};

/// Behavior of the sending side of a [`MemoryTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryMode {
    /// Envelopes reach the other end.
    Deliver = 0,
    /// Sends succeed but envelopes are silently dropped.
    Blackhole = 1,
    /// Sends fail with [`TransportError::Unavailable`].
    Unavailable = 2,
}

impl MemoryMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MemoryMode::Blackhole,
            2 => MemoryMode::Unavailable,
            _ => MemoryMode::Deliver,
        }
    }
}

/// One end of an in-memory duplex channel.
pub struct MemoryTransport<C: MessageCodec = JsonCodec> {
    name: String,
    codec: C,
    mode: AtomicU8,
    peer_tx: mpsc::UnboundedSender<Envelope>,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: Mutex<Option<InboundReceiver>>,
    sent: AtomicU64,
    closed: CancellationToken,
}

impl MemoryTransport<JsonCodec> {
    /// Create two connected ends using the JSON codec.
    pub fn pair(a: &str, b: &str) -> (Self, Self) {
        Self::pair_with_codec(a, b, JsonCodec)
    }
}

impl<C: MessageCodec> MemoryTransport<C> {
    /// Create two connected ends using `codec`.
    pub fn pair_with_codec(a: &str, b: &str, codec: C) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let end = |name: &str, peer_tx, inbound_tx, inbound_rx| MemoryTransport {
            name: name.to_string(),
            codec: codec.clone(),
            mode: AtomicU8::new(MemoryMode::Deliver as u8),
            peer_tx,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            sent: AtomicU64::new(0),
            closed: CancellationToken::new(),
        };

        (
            end(a, b_tx.clone(), a_tx.clone(), a_rx),
            end(b, a_tx, b_tx, b_rx),
        )
    }

    /// Switch how this end handles outbound sends.
    pub fn set_mode(&self, mode: MemoryMode) {
        tracing::debug!(transport = %self.name, ?mode, "memory transport mode changed");
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    /// Current send mode.
    pub fn mode(&self) -> MemoryMode {
        MemoryMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Number of envelopes accepted by [`send`](DuplexTransport::send),
    /// including blackholed ones.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Push an envelope into this end's inbound stream as if the other end
    /// had sent it.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the inbound receiver was dropped.
    pub fn inject(&self, envelope: Envelope) -> TransportResult<()> {
        self.inbound_tx
            .send(envelope)
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl<C: MessageCodec> DuplexTransport for MemoryTransport<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn take_inbound(&self) -> Option<InboundReceiver> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn send(
        &self,
        envelope: &Envelope,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if cancel.is_cancelled() {
            return Err(TransportError::Canceled);
        }
        if Instant::now() >= deadline {
            return Err(TransportError::DeadlineExceeded {
                target: envelope.recipient().to_string(),
            });
        }

        match self.mode() {
            MemoryMode::Unavailable => Err(TransportError::Unavailable {
                target: envelope.recipient().to_string(),
                reason: format!("{} is marked unavailable", self.name),
            }),
            MemoryMode::Blackhole => {
                self.sent.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(transport = %self.name, id = %envelope.id(), "envelope blackholed");
                Ok(())
            }
            MemoryMode::Deliver => {
                let bytes = self.codec.encode(envelope)?;
                let decoded: Envelope = self.codec.decode(&bytes)?;
                self.peer_tx
                    .send(decoded)
                    .map_err(|_| TransportError::Unavailable {
                        target: envelope.recipient().to_string(),
                        reason: "other end dropped".to_string(),
                    })?;
                self.sent.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}
