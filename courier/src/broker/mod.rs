//! The broker: single entry point for dispatching messages.
//!
//! A dispatch builds an envelope, registers a pending entry for two-way
//! requests, then offers the envelope to eligible routers in priority order:
//!
//! ```text
//! dispatch ─► Envelope ─► PendingRequests::register (two-way only)
//!                │
//!                ▼
//!      router 1 ─ RetryWithDifferentRouter / RouteNotAvailable ─► router 2 ─► ...
//!                │
//!                ▼ Handled
//!      immediate reply? ─► complete entry
//!                │
//!                ▼
//!      wait: reply | cancel | deadline | shutdown  (first wins)
//! ```
//!
//! The deadline (`now + timeout`) bounds router attempts and the reply wait
//! together.

mod config;
mod error;
mod options;
mod pending;

use std::sync::Arc;

use courier_core::{Content, Endpoint, EndpointPattern, Envelope, Message, Payload};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use config::BrokerConfig;
pub use error::{BrokerError, RouteAttempt};
pub use options::DispatchOptions;
pub use pending::PendingRequests;

use crate::routing::{MessageRouter, ReplySink, RouteInstruction, RouterRegistry};

/// Builder for [`Broker`].
#[derive(Default)]
pub struct BrokerBuilder {
    config: BrokerConfig,
    routers: RouterRegistry,
}

impl BrokerBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the local endpoint.
    pub fn local_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.local_endpoint = endpoint;
        self
    }

    /// Set the default timeout.
    pub fn default_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    /// Add a router for every recipient at priority 0.
    ///
    /// Routers added this way are tried in the order they were added.
    pub fn router(self, router: Arc<dyn MessageRouter>) -> Self {
        self.route(0, None, router)
    }

    /// Add a router at `priority`, optionally restricted to recipients
    /// matching `pattern`.
    pub fn route(
        mut self,
        priority: i32,
        pattern: Option<EndpointPattern>,
        router: Arc<dyn MessageRouter>,
    ) -> Self {
        self.routers.register(priority, pattern, router);
        self
    }

    /// Build the broker and attach its reply sink to every router.
    pub fn build(self) -> Broker {
        let pending = Arc::new(PendingRequests::new());
        for router in self.routers.routers() {
            let pending = Arc::clone(&pending);
            router.attach_reply_sink(ReplySink::new(move |reply| pending.complete(reply)));
        }

        tracing::debug!(
            "broker for {} built with {} routers",
            self.config.local_endpoint,
            self.routers.len()
        );

        Broker {
            config: self.config,
            routers: self.routers,
            pending,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Routes messages to local or remote handlers and correlates replies.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use courier::processor::MessageProcessor;
/// use courier::routing::InProcessRouter;
/// use courier::{BoxError, Broker, Endpoint, Message};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Greet(String);
///
/// impl Message for Greet {
///     type Reply = String;
/// }
///
/// # async fn run() -> Result<(), courier::BrokerError> {
/// let local = Endpoint::new("hello", "root");
/// let mut processor = MessageProcessor::new();
/// processor.register_fn(|g: Greet| async move { Ok::<_, BoxError>(format!("hello {}", g.0)) });
///
/// let broker = Broker::builder()
///     .local_endpoint(local.clone())
///     .router(Arc::new(InProcessRouter::new(local, Arc::new(processor))))
///     .build();
///
/// let reply = broker.request(Greet("world".into())).await?;
/// assert_eq!(reply, "hello world");
/// # Ok(())
/// # }
/// ```
pub struct Broker {
    config: BrokerConfig,
    routers: RouterRegistry,
    pending: Arc<PendingRequests>,
    shutdown: CancellationToken,
}

impl Broker {
    /// Start building a broker.
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    /// Broker configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Endpoint of this instance.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.config.local_endpoint
    }

    /// The pending-request table.
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// The registered routers.
    pub fn routers(&self) -> &RouterRegistry {
        &self.routers
    }

    /// Dispatch `message` and wait for its typed reply.
    ///
    /// # Errors
    ///
    /// `InvalidOptions` if `options.one_way` is set (use [`send`](Self::send)),
    /// otherwise any error of [`dispatch_envelope`](Self::dispatch_envelope)
    /// plus `MissingHandler`/`ProcessingFault` for fault replies.
    pub async fn dispatch<M: Message>(
        &self,
        message: M,
        options: DispatchOptions,
        cancel: &CancellationToken,
    ) -> Result<M::Reply, BrokerError> {
        if options.one_way {
            return Err(BrokerError::InvalidOptions(
                "one-way dispatch has no reply, use send",
            ));
        }
        let payload = Payload::from_message(&message)?;
        let reply = self.dispatch_payload(payload, options, cancel).await?;
        match reply {
            Some(payload) => Ok(payload.decode()?),
            None => Err(BrokerError::InvalidOptions(
                "two-way dispatch completed without a reply",
            )),
        }
    }

    /// Send `message` one-way; returns once a router accepts it.
    ///
    /// # Errors
    ///
    /// `NoRouteFound` if no router accepted the envelope, `Canceled`,
    /// `Timeout` or `Shutdown` if routing was interrupted.
    pub async fn send<M: Message>(
        &self,
        message: M,
        options: DispatchOptions,
        cancel: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let payload = Payload::from_message(&message)?;
        self.dispatch_payload(payload, options.one_way(), cancel)
            .await
            .map(|_| ())
    }

    /// Dispatch `message` to the local endpoint with the default timeout.
    ///
    /// # Errors
    ///
    /// Same as [`dispatch`](Self::dispatch).
    pub async fn request<M: Message>(&self, message: M) -> Result<M::Reply, BrokerError> {
        self.dispatch(message, DispatchOptions::new(), &CancellationToken::new())
            .await
    }

    /// Dispatch a serialized payload, honoring every option.
    ///
    /// Returns the reply payload for two-way dispatches and `None` for
    /// one-way ones.
    ///
    /// # Errors
    ///
    /// Same as [`dispatch_envelope`](Self::dispatch_envelope), plus fault
    /// replies mapped to `MissingHandler`/`ProcessingFault`.
    pub async fn dispatch_payload(
        &self,
        payload: Payload,
        options: DispatchOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<Payload>, BrokerError> {
        let recipient = options
            .recipient
            .unwrap_or_else(|| self.config.local_endpoint.clone());
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let mut envelope =
            Envelope::request(payload, self.config.local_endpoint.clone(), recipient, timeout);
        if options.one_way {
            envelope = envelope.into_one_way();
        }

        match self.dispatch_envelope(envelope, cancel).await? {
            None => Ok(None),
            Some(reply) => match reply.into_content() {
                Content::Message(payload) => Ok(Some(payload)),
                Content::Fault(fault) => Err(fault.into()),
            },
        }
    }

    /// Dispatch a prebuilt request envelope.
    ///
    /// One-way envelopes return `None` once a router accepts them. Two-way
    /// envelopes return the reply envelope, fault replies included.
    ///
    /// # Errors
    ///
    /// `NoRouteFound`, `Timeout`, `Canceled` or `Shutdown`.
    pub async fn dispatch_envelope(
        &self,
        envelope: Envelope,
        cancel: &CancellationToken,
    ) -> Result<Option<Envelope>, BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Shutdown);
        }
        let deadline = Instant::now() + envelope.timeout();
        let timed_out = || BrokerError::Timeout {
            id: envelope.id(),
            timeout: envelope.timeout(),
        };

        if envelope.is_one_way() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BrokerError::Canceled),
                _ = self.shutdown.cancelled() => return Err(BrokerError::Shutdown),
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                routed = self.route(&envelope, deadline, cancel) => {
                    routed?;
                }
            }
            return Ok(None);
        }

        // Registered before any router sees the envelope so a fast reply
        // always finds its entry.
        let mut guard = self
            .pending
            .register(envelope.id(), envelope.timeout(), deadline)?;

        let immediate = tokio::select! {
            _ = cancel.cancelled() => return Err(BrokerError::Canceled),
            _ = self.shutdown.cancelled() => return Err(BrokerError::Shutdown),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            routed = self.route(&envelope, deadline, cancel) => routed?,
        };
        if let Some(reply) = immediate {
            self.pending.complete(reply);
        }

        let reply = tokio::select! {
            reply = guard.wait() => reply?,
            _ = cancel.cancelled() => return Err(BrokerError::Canceled),
            _ = self.shutdown.cancelled() => return Err(BrokerError::Shutdown),
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!("request {} timed out", envelope.id());
                return Err(timed_out());
            }
        };
        Ok(Some(reply))
    }

    /// Offer `envelope` to eligible routers until one handles it.
    async fn route(
        &self,
        envelope: &Envelope,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Option<Envelope>, BrokerError> {
        let mut attempts = Vec::new();

        for router in self.routers.eligible(envelope.recipient()) {
            tracing::debug!(
                "offering {} for {} to router {} ({})",
                envelope.id(),
                envelope.recipient(),
                router.name(),
                router.kind()
            );
            let outcome = router.dispatch(envelope, deadline, cancel).await;
            match outcome.instruction() {
                RouteInstruction::Handled => return Ok(outcome.into_reply()),
                RouteInstruction::RetryWithDifferentRouter | RouteInstruction::RouteNotAvailable => {
                    tracing::debug!(
                        "router {} declined {}: {:?}",
                        router.name(),
                        envelope.id(),
                        outcome.instruction()
                    );
                    attempts.push(RouteAttempt {
                        router: router.name().to_string(),
                        reason: outcome.reason().unwrap_or("no reason given").to_string(),
                    });
                }
            }
        }

        tracing::warn!(
            "no route found for {} to {} after {} attempts",
            envelope.id(),
            envelope.recipient(),
            attempts.len()
        );
        Err(BrokerError::NoRouteFound {
            recipient: envelope.recipient().clone(),
            attempts,
        })
    }

    /// Fail every in-flight two-way dispatch with `Shutdown` and refuse new
    /// dispatches.
    pub fn shutdown(&self) {
        tracing::debug!("broker for {} shutting down", self.config.local_endpoint);
        self.shutdown.cancel();
        self.pending.close_all();
    }
}
