//! Ordered, filterable set of routers.

use std::sync::Arc;

use courier_core::{Endpoint, EndpointPattern};

use super::MessageRouter;

struct RouterEntry {
    priority: i32,
    pattern: Option<EndpointPattern>,
    router: Arc<dyn MessageRouter>,
}

/// Routers the broker offers envelopes to, highest priority first.
///
/// Ties keep registration order. An entry with a pattern only sees
/// recipients the pattern matches.
#[derive(Default)]
pub struct RouterRegistry {
    entries: Vec<RouterEntry>,
}

impl RouterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a router.
    pub fn register(
        &mut self,
        priority: i32,
        pattern: Option<EndpointPattern>,
        router: Arc<dyn MessageRouter>,
    ) {
        tracing::debug!(
            "registering router {} ({}) priority {} pattern {}",
            router.name(),
            router.kind(),
            priority,
            pattern
                .as_ref()
                .map_or_else(|| "*".to_string(), ToString::to_string)
        );
        let position = self
            .entries
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            RouterEntry {
                priority,
                pattern,
                router,
            },
        );
    }

    /// Routers eligible for `recipient`, in the order they should be tried.
    pub fn eligible<'a>(
        &'a self,
        recipient: &'a Endpoint,
    ) -> impl Iterator<Item = &'a Arc<dyn MessageRouter>> + 'a {
        self.entries
            .iter()
            .filter(move |entry| {
                entry
                    .pattern
                    .as_ref()
                    .is_none_or(|pattern| pattern.matches(recipient))
            })
            .map(|entry| &entry.router)
    }

    /// Every router, in priority order.
    pub fn routers(&self) -> impl Iterator<Item = &Arc<dyn MessageRouter>> {
        self.entries.iter().map(|entry| &entry.router)
    }

    /// Number of routers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no router is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use courier_core::Envelope;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::routing::{ReplySink, RouteError, RouterKind};

    struct Named(&'static str);

    #[async_trait]
    impl MessageRouter for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> RouterKind {
            RouterKind::InProcess
        }

        fn attach_reply_sink(&self, _sink: ReplySink) {}

        async fn route_output(
            &self,
            _envelope: &Envelope,
            _deadline: Instant,
            _cancel: &CancellationToken,
        ) -> Result<Option<Envelope>, RouteError> {
            Ok(None)
        }
    }

    fn names<'a>(routers: impl Iterator<Item = &'a Arc<dyn MessageRouter>>) -> Vec<&'a str> {
        routers.map(|router| router.name()).collect()
    }

    #[test]
    fn test_priority_then_registration_order() {
        let mut registry = RouterRegistry::new();
        registry.register(0, None, Arc::new(Named("low-a")));
        registry.register(10, None, Arc::new(Named("high")));
        registry.register(0, None, Arc::new(Named("low-b")));

        assert_eq!(names(registry.routers()), ["high", "low-a", "low-b"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_patterns_filter_recipients() {
        let mut registry = RouterRegistry::new();
        registry.register(
            5,
            Some("billing/*".parse().expect("pattern")),
            Arc::new(Named("billing")),
        );
        registry.register(0, None, Arc::new(Named("fallback")));

        let billing = Endpoint::new("billing", "w1");
        let orders = Endpoint::new("orders", "w1");
        assert_eq!(names(registry.eligible(&billing)), ["billing", "fallback"]);
        assert_eq!(names(registry.eligible(&orders)), ["fallback"]);
    }
}
