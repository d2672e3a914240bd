//! Brokers in two "processes" joined by a pipe router.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use courier::processor::MessageProcessor;
use courier::routing::{DuplexRouter, InProcessRouter, PipeRouter};
use courier::transport::PipeConfig;
use courier::{BoxError, Broker, DispatchOptions, Endpoint, Message};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize)]
struct WhoAreYou;

impl Message for WhoAreYou {
    type Reply = String;
}

fn identity(name: &'static str) -> Arc<MessageProcessor> {
    let mut processor = MessageProcessor::new();
    processor.register_fn(move |_: WhoAreYou| async move { Ok::<_, BoxError>(name.to_string()) });
    Arc::new(processor)
}

fn config(dir: &std::path::Path, instance: &str) -> PipeConfig {
    PipeConfig::local("shell", "root", instance)
        .with_socket_dir(dir)
        .with_reconnect_delay(Duration::from_millis(5), Duration::from_millis(50))
}

fn broker(instance: &'static str, dir: &std::path::Path) -> (Broker, Arc<PipeRouter>) {
    let local = Endpoint::new("shell", instance);
    let processor = identity(instance);
    let pipe = Arc::new(
        DuplexRouter::pipe(config(dir, instance), Arc::clone(&processor)).expect("pipe"),
    );
    let broker = Broker::builder()
        .local_endpoint(local.clone())
        .route(10, None, Arc::new(InProcessRouter::new(local, processor)))
        .route(0, None, pipe.clone())
        .default_timeout(Duration::from_secs(5))
        .build();
    (broker, pipe)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_root_and_worker_answer_each_other() {
    courier::telemetry::init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let (root, root_pipe) = broker("root", dir.path());
    let (worker, worker_pipe) = broker("w1", dir.path());

    let cancel = CancellationToken::new();
    let from_root = worker
        .dispatch(
            WhoAreYou,
            DispatchOptions::new().to(Endpoint::new("shell", "root")),
            &cancel,
        )
        .await
        .expect("root answers");
    assert_eq!(from_root, "root");

    assert!(
        root_pipe
            .transport()
            .wait_for_link("w1", Instant::now() + Duration::from_secs(5))
            .await
    );
    let from_worker = root
        .dispatch(
            WhoAreYou,
            DispatchOptions::new().to(Endpoint::new("shell", "w1")),
            &cancel,
        )
        .await
        .expect("worker answers");
    assert_eq!(from_worker, "w1");

    // Local requests never touch the pipe.
    let sent_before = worker_pipe.transport().metrics().frames_sent;
    assert_eq!(worker.request(WhoAreYou).await.expect("local"), "w1");
    assert_eq!(worker_pipe.transport().metrics().frames_sent, sent_before);

    assert!(root.pending().is_empty());
    assert!(worker.pending().is_empty());

    worker_pipe.stop().await;
    root_pipe.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_cannot_reach_siblings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_root, _root_pipe) = broker("root", dir.path());
    let (worker, _worker_pipe) = broker("w1", dir.path());

    let result = worker
        .dispatch(
            WhoAreYou,
            DispatchOptions::new().to(Endpoint::new("shell", "w2")),
            &CancellationToken::new(),
        )
        .await;
    assert!(
        matches!(result, Err(courier::BrokerError::NoRouteFound { .. })),
        "{result:?}"
    );
}
