//! Message processing pipeline.
//!
//! The [`MessageProcessor`] resolves exactly one handler for a request's
//! type key and runs it inside the matching filters:
//!
//! ```text
//! Created      resolve handler (none ⇒ MissingHandler, no hook runs)
//! BeforeHooks  before() of matching filters, highest priority first
//! Handler      decode request, handle, encode reply
//! AfterHooks   after() of every filter whose before() started, reverse order
//! Completed | Faulted
//! ```
//!
//! Errors surface only after every applicable after-hook has run, and a
//! scoped handler instance is dropped once the pipeline finishes.

mod context;
mod error;
mod filter;
mod handler;

use std::future::Future;

use courier_core::{Message, Payload};
use tokio_util::sync::CancellationToken;

pub use context::{ProcessingContext, ProcessingStage};
pub use error::ProcessingError;
pub use filter::{Filter, FilterRegistration};
pub use handler::{FnHandler, Handler, HandlerRegistry};

use crate::BoxError;
use filter::FilterChain;

/// Resolves handlers and runs them through the filter pipeline.
///
/// Configure it with `&mut self` methods, then share it behind an `Arc`
/// with the routers that deliver requests to it.
#[derive(Default)]
pub struct MessageProcessor {
    handlers: HandlerRegistry,
    filters: FilterChain,
}

impl MessageProcessor {
    /// Create a processor with no handlers or filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared handler for `M`.
    pub fn register<M, H>(&mut self, handler: H) -> &mut Self
    where
        M: Message,
        H: Handler<M>,
    {
        self.handlers.register::<M, H>(handler);
        self
    }

    /// Register a factory building a fresh handler per `M` request.
    pub fn register_scoped<M, H, F>(&mut self, factory: F) -> &mut Self
    where
        M: Message,
        H: Handler<M>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.handlers.register_scoped::<M, H, F>(factory);
        self
    }

    /// Register an async closure handling `M`.
    pub fn register_fn<M, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        M: Message,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Reply, BoxError>> + Send + 'static,
    {
        self.handlers.register_fn::<M, F, Fut>(handler);
        self
    }

    /// Add a filter to the pipeline.
    pub fn add_filter(&mut self, registration: FilterRegistration) -> &mut Self {
        self.filters.add(registration);
        self
    }

    /// The handler registry.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Number of registered filters.
    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Process a request payload and return the reply payload.
    ///
    /// `configure` runs on the fresh context before handler resolution, e.g.
    /// to record the sender or seed properties.
    ///
    /// # Errors
    ///
    /// `MissingHandler` when no handler is registered for the type key,
    /// `Canceled` when `cancel` fired before the handler started, `Faulted`
    /// or `Codec` when the handler or a filter failed.
    pub async fn process<F>(
        &self,
        request: Payload,
        configure: F,
        cancel: &CancellationToken,
    ) -> Result<Payload, ProcessingError>
    where
        F: FnOnce(&mut ProcessingContext) + Send,
    {
        let type_key = request.type_key().to_string();
        let mut ctx = ProcessingContext::new(request, cancel.clone());
        configure(&mut ctx);

        let Some(handler) = self.handlers.resolve(&type_key) else {
            tracing::debug!("no handler for '{}'", type_key);
            return Err(ProcessingError::MissingHandler { type_key });
        };
        let filters = self.filters.matching(&type_key);

        let mut error: Option<ProcessingError> = None;
        let mut started = 0;

        ctx.set_stage(ProcessingStage::BeforeHooks);
        for filter in &filters {
            if cancel.is_cancelled() {
                error = Some(ProcessingError::Canceled);
                break;
            }
            started += 1;
            if let Err(e) = filter.before(&mut ctx, cancel).await {
                error = Some(ProcessingError::Faulted {
                    type_key: type_key.clone(),
                    message: e.to_string(),
                });
                break;
            }
        }

        if error.is_none() {
            if cancel.is_cancelled() {
                error = Some(ProcessingError::Canceled);
            } else {
                ctx.set_stage(ProcessingStage::Handler);
                match handler.invoke(&ctx).await {
                    Ok(reply) => ctx.set_reply(reply),
                    Err(e) => error = Some(e),
                }
            }
        }

        if let Some(e) = &error {
            ctx.record_fault(e.to_fault());
        }

        ctx.set_stage(ProcessingStage::AfterHooks);
        for filter in filters[..started].iter().rev() {
            if let Err(e) = filter.after(&mut ctx, cancel).await {
                tracing::warn!("after-hook for '{}' failed: {}", type_key, e);
                let failure = ProcessingError::Faulted {
                    type_key: type_key.clone(),
                    message: e.to_string(),
                };
                ctx.record_fault(failure.to_fault());
                if error.is_none() {
                    error = Some(failure);
                }
            }
        }

        drop(handler);

        if let Some(e) = error {
            ctx.set_stage(ProcessingStage::Faulted);
            tracing::debug!("processing '{}' faulted: {}", type_key, e);
            return Err(e);
        }

        ctx.set_stage(ProcessingStage::Completed);
        ctx.take_reply().ok_or_else(|| ProcessingError::Faulted {
            type_key,
            message: "handler produced no reply".to_string(),
        })
    }

    /// Process a typed message and decode its reply.
    ///
    /// # Errors
    ///
    /// Same as [`process`](Self::process).
    pub async fn process_message<M: Message>(
        &self,
        message: M,
        cancel: &CancellationToken,
    ) -> Result<M::Reply, ProcessingError> {
        let request = Payload::from_message(&message)?;
        let reply = self.process(request, |_| {}, cancel).await?;
        Ok(reply.decode()?)
    }
}
