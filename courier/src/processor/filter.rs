//! Filters wrapping handler execution.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::Message;
use tokio_util::sync::CancellationToken;

use super::ProcessingContext;
use crate::BoxError;

/// A pipeline stage with hooks around the handler.
///
/// Both hooks default to doing nothing. A failing `before` stops the
/// pipeline before the handler; `after` still runs for every filter whose
/// `before` started.
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    /// Runs before the handler, highest priority first.
    async fn before(
        &self,
        _ctx: &mut ProcessingContext,
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs after the handler, in reverse order of the `before` hooks.
    async fn after(
        &self,
        _ctx: &mut ProcessingContext,
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A filter with its priority and optional request-type restriction.
#[derive(Clone)]
pub struct FilterRegistration {
    priority: i32,
    applies_to: Option<String>,
    filter: Arc<dyn Filter>,
}

impl FilterRegistration {
    /// Register `filter` for every request type.
    pub fn new(priority: i32, filter: impl Filter) -> Self {
        Self {
            priority,
            applies_to: None,
            filter: Arc::new(filter),
        }
    }

    /// Restrict the filter to requests of type `M`.
    pub fn for_message<M: Message>(self) -> Self {
        self.for_type_key(M::type_key())
    }

    /// Restrict the filter to requests with the given type key.
    pub fn for_type_key(mut self, type_key: impl Into<String>) -> Self {
        self.applies_to = Some(type_key.into());
        self
    }

    /// Processing priority; higher runs `before` earlier.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether this filter runs for requests with `type_key`.
    pub fn applies(&self, type_key: &str) -> bool {
        self.applies_to.as_deref().is_none_or(|key| key == type_key)
    }
}

impl std::fmt::Debug for FilterRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistration")
            .field("priority", &self.priority)
            .field("applies_to", &self.applies_to)
            .finish_non_exhaustive()
    }
}

/// Filters ordered by descending priority, ties in registration order.
#[derive(Default)]
pub(crate) struct FilterChain {
    entries: Vec<FilterRegistration>,
}

impl FilterChain {
    pub(crate) fn add(&mut self, registration: FilterRegistration) {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.priority < registration.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, registration);
    }

    /// Filters that apply to `type_key`, in `before` order.
    pub(crate) fn matching(&self, type_key: &str) -> Vec<Arc<dyn Filter>> {
        self.entries
            .iter()
            .filter(|entry| entry.applies(type_key))
            .map(|entry| Arc::clone(&entry.filter))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Filter for Noop {}

    #[test]
    fn test_chain_orders_by_priority_then_registration() {
        let mut chain = FilterChain::default();
        chain.add(FilterRegistration::new(1, Noop).for_type_key("a"));
        chain.add(FilterRegistration::new(5, Noop).for_type_key("b"));
        chain.add(FilterRegistration::new(1, Noop).for_type_key("c"));
        chain.add(FilterRegistration::new(3, Noop).for_type_key("d"));

        let order: Vec<_> = chain
            .entries
            .iter()
            .map(|entry| entry.applies_to.clone().unwrap_or_default())
            .collect();
        assert_eq!(order, ["b", "d", "a", "c"]);
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_type_restriction() {
        let any = FilterRegistration::new(0, Noop);
        let only_ping = FilterRegistration::new(0, Noop).for_type_key("Ping");

        assert!(any.applies("Ping"));
        assert!(any.applies("Pong"));
        assert!(only_ping.applies("Ping"));
        assert!(!only_ping.applies("Pong"));
    }
}
