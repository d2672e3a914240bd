//! Broker behavior with in-process routers and scripted routers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier::processor::{Filter, FilterRegistration, MessageProcessor, ProcessingContext};
use courier::routing::{InProcessRouter, MessageRouter, ReplySink, RouteError, RouterKind};
use courier::transport::TransportError;
use courier::{BoxError, Broker, BrokerError, DispatchOptions, Endpoint, Envelope, Message};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize)]
struct Add(i64, i64);

impl Message for Add {
    type Reply = i64;
}

#[derive(Debug, Serialize, Deserialize)]
struct Unregistered;

impl Message for Unregistered {
    type Reply = ();
}

fn local() -> Endpoint {
    Endpoint::new("calc", "root")
}

fn adder() -> MessageProcessor {
    let mut processor = MessageProcessor::new();
    processor.register_fn(|add: Add| async move { Ok::<_, BoxError>(add.0 + add.1) });
    processor
}

fn in_process(processor: MessageProcessor) -> Arc<InProcessRouter> {
    Arc::new(InProcessRouter::new(local(), Arc::new(processor)))
}

/// Router that always fails the same way and counts how often it was asked.
struct Scripted {
    name: &'static str,
    calls: AtomicUsize,
    not_for_me: bool,
}

impl Scripted {
    fn unavailable(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            not_for_me: false,
        })
    }

    fn elsewhere(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            not_for_me: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageRouter for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> RouterKind {
        RouterKind::Duplex
    }

    fn attach_reply_sink(&self, _sink: ReplySink) {}

    async fn route_output(
        &self,
        envelope: &Envelope,
        _deadline: Instant,
        _cancel: &CancellationToken,
    ) -> Result<Option<Envelope>, RouteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.not_for_me {
            return Err(RouteError::NotForThisRouter {
                recipient: envelope.recipient().clone(),
            });
        }
        Err(RouteError::Transport(TransportError::Unavailable {
            target: envelope.recipient().to_string(),
            reason: "pipe not ready".to_string(),
        }))
    }
}

#[tokio::test]
async fn test_request_is_answered_in_process() {
    courier::telemetry::init_tracing();
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(in_process(adder()))
        .build();

    assert_eq!(broker.request(Add(2, 40)).await.expect("sum"), 42);
    assert!(broker.pending().is_empty());
}

#[tokio::test]
async fn test_missing_handler_is_an_error() {
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(in_process(adder()))
        .build();

    let result = broker.request(Unregistered).await;
    assert!(matches!(result, Err(BrokerError::MissingHandler(_))), "{result:?}");
}

#[tokio::test]
async fn test_handler_fault_is_surfaced() {
    let mut processor = MessageProcessor::new();
    processor.register_fn(|_add: Add| async move { Err::<i64, BoxError>("overflow".into()) });
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(in_process(processor))
        .build();

    match broker.request(Add(1, 1)).await {
        Err(BrokerError::ProcessingFault(message)) => assert!(message.contains("overflow")),
        other => panic!("expected a processing fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unavailable_router_falls_through_and_is_not_retried() {
    let failing = Scripted::unavailable("pipe");
    let broker = Broker::builder()
        .local_endpoint(local())
        .route(10, None, failing.clone())
        .route(0, None, in_process(adder()))
        .build();

    assert_eq!(broker.request(Add(3, 4)).await.expect("sum"), 7);
    assert_eq!(failing.calls(), 1);
}

#[tokio::test]
async fn test_router_for_other_recipients_is_skipped() {
    let elsewhere = Scripted::elsewhere("remote-only");
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(elsewhere.clone())
        .router(in_process(adder()))
        .build();

    assert_eq!(broker.request(Add(1, 2)).await.expect("sum"), 3);
    assert_eq!(elsewhere.calls(), 1);
}

#[tokio::test]
async fn test_patterns_keep_routers_away_from_other_applications() {
    let billing_only = Scripted::unavailable("billing");
    let broker = Broker::builder()
        .local_endpoint(local())
        .route(
            10,
            Some("billing/*".parse().expect("pattern")),
            billing_only.clone(),
        )
        .router(in_process(adder()))
        .build();

    broker.request(Add(1, 1)).await.expect("sum");
    assert_eq!(billing_only.calls(), 0);
}

#[tokio::test]
async fn test_no_route_found_reports_every_router() {
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(Scripted::unavailable("first"))
        .router(Scripted::elsewhere("second"))
        .build();

    match broker.request(Add(1, 1)).await {
        Err(BrokerError::NoRouteFound { attempts, .. }) => {
            let routers: Vec<_> = attempts.iter().map(|a| a.router.as_str()).collect();
            assert_eq!(routers, ["first", "second"]);
            assert!(attempts[0].reason.contains("pipe not ready"));
        }
        other => panic!("expected NoRouteFound, got {other:?}"),
    }
    assert!(broker.pending().is_empty());
}

#[tokio::test]
async fn test_one_way_send_returns_without_waiting_for_processing() {
    let release = Arc::new(tokio::sync::Notify::new());
    let done = Arc::new(AtomicUsize::new(0));
    let mut processor = MessageProcessor::new();
    processor.register_fn({
        let release = Arc::clone(&release);
        let done = Arc::clone(&done);
        move |add: Add| {
            let release = Arc::clone(&release);
            let done = Arc::clone(&done);
            async move {
                release.notified().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(add.0 + add.1)
            }
        }
    });
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(in_process(processor))
        .build();

    broker
        .send(Add(1, 1), DispatchOptions::new(), &CancellationToken::new())
        .await
        .expect("accepted");
    assert_eq!(done.load(Ordering::SeqCst), 0);
    assert!(broker.pending().is_empty());

    release.notify_one();
    tokio::time::timeout(Duration::from_secs(1), async {
        while done.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("one-way message processed in the background");
}

#[tokio::test]
async fn test_dispatch_refuses_one_way_options() {
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(in_process(adder()))
        .build();

    let result = broker
        .dispatch(
            Add(1, 1),
            DispatchOptions::new().one_way(),
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(BrokerError::InvalidOptions(_))));
}

#[tokio::test]
async fn test_slow_local_handler_times_out() {
    let mut processor = MessageProcessor::new();
    processor.register_fn(|add: Add| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok::<_, BoxError>(add.0)
    });
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(in_process(processor))
        .build();

    let result = broker
        .dispatch(
            Add(1, 1),
            DispatchOptions::new().timeout(Duration::from_millis(50)),
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(BrokerError::Timeout { .. })), "{result:?}");
    assert!(broker.pending().is_empty());
}

type Log = Arc<Mutex<Vec<String>>>;

struct Trace {
    label: &'static str,
    log: Log,
}

#[async_trait]
impl Filter for Trace {
    async fn before(
        &self,
        ctx: &mut ProcessingContext,
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        ctx.set_property(format!("seen-{}", self.label), "yes");
        self.log.lock().expect("log").push(format!("before {}", self.label));
        Ok(())
    }

    async fn after(
        &self,
        ctx: &mut ProcessingContext,
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        assert_eq!(ctx.property(&format!("seen-{}", self.label)), Some("yes"));
        self.log.lock().expect("log").push(format!("after {}", self.label));
        Ok(())
    }
}

#[tokio::test]
async fn test_filters_nest_by_priority() {
    let log = Log::default();
    let mut processor = adder();
    processor
        .add_filter(FilterRegistration::new(
            1,
            Trace {
                label: "1",
                log: Arc::clone(&log),
            },
        ))
        .add_filter(FilterRegistration::new(
            2,
            Trace {
                label: "2",
                log: Arc::clone(&log),
            },
        ));
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(in_process(processor))
        .build();

    broker.request(Add(0, 0)).await.expect("sum");
    assert_eq!(
        *log.lock().expect("log"),
        ["before 2", "before 1", "after 1", "after 2"]
    );
}

#[tokio::test]
async fn test_dispatch_after_shutdown_fails() {
    let broker = Broker::builder()
        .local_endpoint(local())
        .router(in_process(adder()))
        .build();

    broker.shutdown();
    assert!(matches!(
        broker.request(Add(1, 1)).await,
        Err(BrokerError::Shutdown)
    ));
}
