//! Pending-request correlation table.
//!
//! # Architecture
//!
//! ```text
//! Request Flow:
//!   1. Broker registers the request id (before any router sees it)
//!   2. Broker offers the envelope to routers
//!   3. Broker waits on the entry's oneshot receiver
//!
//! Reply Flow:
//!   4. Router hands the reply to the ReplySink
//!   5. complete() removes the entry keyed by reply_to
//!   6. oneshot fires, the waiting dispatch wakes up
//!
//! Timeout / Cancellation:
//!   4. Waiter stops waiting and drops its guard
//!   5. Guard removes the entry; a later reply finds nothing
//! ```
//!
//! Removing the entry is the completion step, so every entry completes at
//! most once no matter how many times its reply is delivered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use courier_core::{Envelope, EnvelopeId};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::BrokerError;

type Completion = oneshot::Sender<Result<Envelope, BrokerError>>;

struct PendingEntry {
    sender: Completion,
    deadline: Instant,
    timeout: Duration,
}

/// In-flight two-way dispatches awaiting a reply, keyed by request id.
///
/// Owned by one [`Broker`](super::Broker). Safe for concurrent insert,
/// complete and remove from dispatch callers and router reader tasks.
#[derive(Default)]
pub struct PendingRequests {
    entries: DashMap<EnvelopeId, PendingEntry>,
    closed: AtomicBool,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the guard the caller waits on.
    ///
    /// # Errors
    ///
    /// `Shutdown` once [`close_all`](Self::close_all) has run.
    pub(crate) fn register(
        self: &Arc<Self>,
        id: EnvelopeId,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<PendingGuard, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Shutdown);
        }

        let (sender, receiver) = oneshot::channel();
        self.entries.insert(
            id,
            PendingEntry {
                sender,
                deadline,
                timeout,
            },
        );

        // close_all may have drained the table between the check and the insert.
        if self.closed.load(Ordering::SeqCst) {
            self.entries.remove(&id);
            return Err(BrokerError::Shutdown);
        }

        Ok(PendingGuard {
            table: Arc::clone(self),
            id,
            receiver,
        })
    }

    /// Complete the entry answered by `reply`.
    ///
    /// Returns `false` when no entry matches (late, duplicate or unknown
    /// reply); such replies have no effect.
    pub fn complete(&self, reply: Envelope) -> bool {
        let Some(id) = reply.reply_to() else {
            tracing::warn!("envelope {} is not a reply, ignoring", reply.id());
            return false;
        };

        match self.entries.remove(&id) {
            Some((_, entry)) => {
                tracing::debug!("completing pending request {}", id);
                // The waiter may already be gone; nothing else to do then.
                let _ = entry.sender.send(Ok(reply));
                true
            }
            None => {
                tracing::debug!("no pending request {} (late or duplicate reply)", id);
                false
            }
        }
    }

    /// Drop the entry for `id` without completing it.
    ///
    /// The waiter, if any, observes `Canceled`.
    pub fn remove(&self, id: &EnvelopeId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Whether `id` is still waiting for a reply.
    pub fn contains(&self, id: &EnvelopeId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail every entry whose deadline is at or before `now` with `Timeout`.
    ///
    /// Returns the number of entries purged.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let expired: Vec<EnvelopeId> = self
            .entries
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut purged = 0;
        for id in expired {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let _ = entry.sender.send(Err(BrokerError::Timeout {
                    id,
                    timeout: entry.timeout,
                }));
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::debug!("purged {} expired pending requests", purged);
        }
        purged
    }

    /// Fail every entry with `Shutdown` and refuse new registrations.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let ids: Vec<EnvelopeId> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let _ = entry.sender.send(Err(BrokerError::Shutdown));
            }
        }
    }
}

/// A registered request. Dropping it removes the entry.
pub(crate) struct PendingGuard {
    table: Arc<PendingRequests>,
    id: EnvelopeId,
    receiver: oneshot::Receiver<Result<Envelope, BrokerError>>,
}

impl PendingGuard {
    /// Wait for the entry to complete.
    pub(crate) async fn wait(&mut self) -> Result<Envelope, BrokerError> {
        match (&mut self.receiver).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Canceled),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.table.remove(&self.id) {
            tracing::debug!("pending request {} abandoned", self.id);
        }
    }
}
