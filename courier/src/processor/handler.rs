//! Dynamic message dispatch via handler registry.
//!
//! Requests arrive as a [`Payload`] tagged with a string type key. Rust has
//! no runtime reflection to get from that string to a `Handler<M>` impl, so
//! registration builds a type-erased adapter per message type:
//!
//! ```text
//! Payload { type_key: "Add", bytes: [...] }
//!   ↓
//! registry.resolve("Add") → ResolvedHandler
//!   ↓
//! ErasedHandler::invoke:
//!   1. Deserialize bytes → Add
//!   2. Call Handler::<Add>::handle(add, ctx) → Result<Sum, BoxError>
//!   3. Serialize Sum → Payload { type_key: "Sum", .. }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Message, Payload};

use super::{ProcessingContext, ProcessingError};
use crate::BoxError;

/// Handles one message type and produces its reply.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use courier::processor::{Handler, ProcessingContext};
/// use courier::{BoxError, Message};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Add(i64, i64);
///
/// impl Message for Add {
///     type Reply = i64;
/// }
///
/// struct Adder;
///
/// #[async_trait]
/// impl Handler<Add> for Adder {
///     async fn handle(&self, message: Add, _ctx: &ProcessingContext) -> Result<i64, BoxError> {
///         Ok(message.0 + message.1)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<M: Message>: Send + Sync + 'static {
    /// Handle `message`.
    async fn handle(&self, message: M, ctx: &ProcessingContext) -> Result<M::Reply, BoxError>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<M, F, Fut> Handler<M> for FnHandler<F>
where
    M: Message,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<M::Reply, BoxError>> + Send + 'static,
{
    async fn handle(&self, message: M, _ctx: &ProcessingContext) -> Result<M::Reply, BoxError> {
        (self.0)(message).await
    }
}

/// Handler with its message type erased.
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn invoke(&self, ctx: &ProcessingContext) -> Result<Payload, ProcessingError>;
}

struct TypedHandler<M, H> {
    handler: H,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> TypedHandler<M, H> {
    fn new(handler: H) -> Self {
        Self {
            handler,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> ErasedHandler for TypedHandler<M, H>
where
    M: Message,
    H: Handler<M>,
{
    async fn invoke(&self, ctx: &ProcessingContext) -> Result<Payload, ProcessingError> {
        let message: M = ctx.request().decode()?;
        let reply = self
            .handler
            .handle(message, ctx)
            .await
            .map_err(|e| ProcessingError::Faulted {
                type_key: ctx.type_key().to_string(),
                message: e.to_string(),
            })?;
        Ok(Payload::new(courier_core::type_key::<M::Reply>(), &reply)?)
    }
}

type HandlerFactory = Box<dyn Fn() -> Arc<dyn ErasedHandler> + Send + Sync>;

enum HandlerSlot {
    /// One instance serves every request.
    Shared(Arc<dyn ErasedHandler>),
    /// A fresh instance per request, dropped when processing finishes.
    Scoped(HandlerFactory),
}

/// Handler instance resolved for one request.
pub(crate) type ResolvedHandler = Arc<dyn ErasedHandler>;

/// Registry mapping type keys to exactly one handler each.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerSlot>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared handler instance for `M`.
    pub fn register<M, H>(&mut self, handler: H)
    where
        M: Message,
        H: Handler<M>,
    {
        let slot = HandlerSlot::Shared(Arc::new(TypedHandler::<M, H>::new(handler)));
        self.insert(M::type_key(), slot);
    }

    /// Register a factory creating a fresh handler for every `M` request.
    pub fn register_scoped<M, H, F>(&mut self, factory: F)
    where
        M: Message,
        H: Handler<M>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let factory: HandlerFactory =
            Box::new(move || Arc::new(TypedHandler::<M, H>::new(factory())));
        self.insert(M::type_key(), HandlerSlot::Scoped(factory));
    }

    /// Register an async closure handling `M`.
    pub fn register_fn<M, F, Fut>(&mut self, handler: F)
    where
        M: Message,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Reply, BoxError>> + Send + 'static,
    {
        self.register::<M, FnHandler<F>>(FnHandler(handler));
    }

    fn insert(&mut self, type_key: String, slot: HandlerSlot) {
        tracing::debug!("Registering handler for '{}'", type_key);
        if self.handlers.insert(type_key.clone(), slot).is_some() {
            tracing::warn!("handler for '{}' replaced by a later registration", type_key);
        }
    }

    /// Whether a handler is registered for `type_key`.
    pub fn contains(&self, type_key: &str) -> bool {
        self.handlers.contains_key(type_key)
    }

    /// Number of registered type keys.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn resolve(&self, type_key: &str) -> Option<ResolvedHandler> {
        self.handlers.get(type_key).map(|slot| match slot {
            HandlerSlot::Shared(handler) => Arc::clone(handler),
            HandlerSlot::Scoped(factory) => factory(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Echo(String);

    impl Message for Echo {
        type Reply = String;
    }

    fn context(payload: Payload) -> ProcessingContext {
        ProcessingContext::new(payload, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_register_fn_round_trips_payloads() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn(|echo: Echo| async move { Ok::<_, BoxError>(echo.0.to_uppercase()) });

        let handler = registry.resolve("Echo").expect("registered");
        let ctx = context(Payload::from_message(&Echo("hi".into())).expect("payload"));
        let reply = handler.invoke(&ctx).await.expect("handled");

        assert_eq!(reply.type_key(), "String");
        assert_eq!(reply.decode::<String>().expect("reply"), "HI");
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_codec_error() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn(|echo: Echo| async move { Ok::<_, BoxError>(echo.0) });

        let handler = registry.resolve("Echo").expect("registered");
        let ctx = context(Payload::from_raw("Echo", b"not json".to_vec()));
        let result = handler.invoke(&ctx).await;
        assert!(matches!(result, Err(ProcessingError::Codec(_))));
    }

    #[test]
    fn test_scoped_factory_builds_per_resolution() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);

        struct Counting;

        #[async_trait]
        impl Handler<Echo> for Counting {
            async fn handle(&self, echo: Echo, _ctx: &ProcessingContext) -> Result<String, BoxError> {
                Ok(echo.0)
            }
        }

        let mut registry = HandlerRegistry::new();
        registry.register_scoped::<Echo, _, _>(|| {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Counting
        });

        assert_eq!(CREATED.load(Ordering::SeqCst), 0);
        let _first = registry.resolve("Echo");
        let _second = registry.resolve("Echo");
        assert_eq!(CREATED.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_later_registration_replaces_earlier() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn(|echo: Echo| async move { Ok::<_, BoxError>(echo.0) });
        registry.register_fn(|_echo: Echo| async move { Ok::<_, BoxError>(String::new()) });
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("Echo"));
        assert!(registry.resolve("Missing").is_none());
    }
}
