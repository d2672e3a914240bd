//! Pipe transport: links, background tasks and the send path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{Envelope, JsonCodec, MessageCodec};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::channel::{self, BoxedStream, ChannelListener, ChannelName};
use super::config::PipeConfig;
use super::metrics::{MetricsRecorder, PipeMetrics};
use crate::{
    DuplexTransport, FrameKind, InboundReceiver, TransportError, TransportResult,
    serialize_frame, try_deserialize_frame,
};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// State for managing reconnections with exponential backoff.
#[derive(Debug, Clone)]
struct ReconnectState {
    /// Current backoff delay
    current_delay: Duration,

    /// Number of consecutive failures
    failure_count: u32,
}

impl ReconnectState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            current_delay: initial_delay,
            failure_count: 0,
        }
    }

    fn reset(&mut self, initial_delay: Duration) {
        self.current_delay = initial_delay;
        self.failure_count = 0;
    }
}

/// A frame queued for a link's writer task.
struct OutboundFrame {
    bytes: Vec<u8>,

    /// Completed once the whole frame is flushed or the write failed
    written: oneshot::Sender<std::io::Result<()>>,
}

/// One established connection to a peer instance.
///
/// Only the link's writer task touches the write half. Senders queue whole
/// frames, so a send future dropped mid-flight never leaves a partial frame
/// on the stream.
struct Link {
    id: u64,
    peer: String,
    send_queue: mpsc::UnboundedSender<OutboundFrame>,
    closed: CancellationToken,
}

impl Link {
    /// Queue `frame` and wait until the writer task has flushed it.
    async fn write_frame(&self, frame: Vec<u8>) -> std::io::Result<()> {
        let (written, done) = oneshot::channel();
        let queued = self.send_queue.send(OutboundFrame {
            bytes: frame,
            written,
        });
        if queued.is_err() {
            return Err(link_closed());
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(link_closed()),
            result = done => result.unwrap_or_else(|_| Err(link_closed())),
        }
    }
}

fn link_closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "link closed")
}

/// State shared between the transport handle and its background tasks.
struct Shared<C: MessageCodec> {
    config: PipeConfig,
    codec: C,

    /// Live links keyed by peer instance id
    links: DashMap<String, Arc<Link>>,

    /// Woken whenever a link is added or removed
    link_changed: Notify,

    inbound_tx: mpsc::UnboundedSender<Envelope>,
    shutdown: CancellationToken,
    metrics: MetricsRecorder,
    next_link_id: AtomicU64,

    /// Set when a client exhausted `max_connection_failures`
    gave_up: AtomicBool,
}

impl<C: MessageCodec> Shared<C> {
    fn register_link(
        self: &Arc<Self>,
        peer: String,
        writer: WriteHalf<BoxedStream>,
    ) -> Arc<Link> {
        let (send_queue, queued) = mpsc::unbounded_channel();
        let link = Arc::new(Link {
            id: self.next_link_id.fetch_add(1, Ordering::Relaxed),
            peer: peer.clone(),
            send_queue,
            closed: CancellationToken::new(),
        });
        tokio::spawn(write_loop(Arc::clone(self), Arc::clone(&link), writer, queued));

        if let Some(previous) = self.links.insert(peer.clone(), Arc::clone(&link)) {
            tracing::debug!("pipe link to {} replaced by a newer connection", peer);
            previous.closed.cancel();
            self.metrics.record_link_lost();
        }
        self.metrics.record_link_established();
        self.link_changed.notify_waiters();

        tracing::debug!("pipe link {} established with {}", link.id, peer);
        link
    }

    fn drop_link(&self, link: &Link) {
        link.closed.cancel();
        if self
            .links
            .remove_if(&link.peer, |_, current| current.id == link.id)
            .is_some()
        {
            self.metrics.record_link_lost();
            tracing::debug!("pipe link {} to {} dropped", link.id, link.peer);
        }
        self.link_changed.notify_waiters();
    }

    fn link_to(&self, instance: &str) -> Option<Arc<Link>> {
        self.links.get(instance).map(|entry| Arc::clone(entry.value()))
    }

    /// Read frames from `reader` until the link closes, the transport shuts
    /// down, or the peer sends something that is not a valid frame.
    async fn read_loop(
        &self,
        link: &Link,
        reader: &mut ReadHalf<BoxedStream>,
        buffer: &mut Vec<u8>,
    ) {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            loop {
                match try_deserialize_frame(buffer) {
                    Ok(Some((kind, payload, consumed))) => {
                        buffer.drain(..consumed);
                        self.handle_frame(link, kind, &payload);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Framing is lost once a frame is invalid; tear the link down.
                        tracing::warn!(
                            "wire error on pipe link to {}: {} - tearing down link",
                            link.peer,
                            e
                        );
                        self.metrics.record_frame_rejected();
                        return;
                    }
                }
            }

            let read = tokio::select! {
                _ = link.closed.cancelled() => return,
                _ = self.shutdown.cancelled() => return,
                read = reader.read(&mut chunk) => read,
            };

            match read {
                Ok(0) => {
                    tracing::debug!("pipe link to {} reached end of stream", link.peer);
                    return;
                }
                Ok(n) => {
                    self.metrics.record_bytes_received(n);
                    buffer.extend_from_slice(&chunk[..n]);
                }
                Err(e) => {
                    tracing::debug!("read error on pipe link to {}: {}", link.peer, e);
                    return;
                }
            }
        }
    }

    fn handle_frame(&self, link: &Link, kind: FrameKind, payload: &[u8]) {
        match kind {
            FrameKind::Envelope => match self.codec.decode::<Envelope>(payload) {
                Ok(envelope) => {
                    self.metrics.record_frame_received();
                    if self.inbound_tx.send(envelope).is_err() {
                        tracing::debug!("inbound receiver dropped, discarding envelope");
                    }
                }
                Err(e) => {
                    tracing::warn!("undecodable envelope from {}: {}", link.peer, e);
                    self.metrics.record_frame_rejected();
                }
            },
            FrameKind::Hello => {
                tracing::debug!("ignoring repeated hello from {}", link.peer);
            }
        }
    }
}

/// Drain a link's send queue onto its write half until the link closes.
async fn write_loop<C: MessageCodec>(
    shared: Arc<Shared<C>>,
    link: Arc<Link>,
    mut writer: WriteHalf<BoxedStream>,
    mut queued: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    loop {
        let next = tokio::select! {
            _ = link.closed.cancelled() => break,
            next = queued.recv() => next,
        };
        let Some(frame) = next else { break };

        let write = async {
            writer.write_all(&frame.bytes).await?;
            writer.flush().await
        };
        let result = tokio::select! {
            _ = link.closed.cancelled() => Err(link_closed()),
            result = write => result,
        };

        match result {
            Ok(()) => {
                shared.metrics.record_frame_sent(frame.bytes.len());
                let _ = frame.written.send(Ok(()));
            }
            Err(e) => {
                tracing::debug!("write to {} failed: {}", link.peer, e);
                let _ = frame.written.send(Err(e));
                shared.drop_link(&link);
                break;
            }
        }
    }
    tracing::debug!("pipe writer for link {} to {} stopped", link.id, link.peer);
}

/// Read frames until the first one, which must be a `Hello` naming the peer.
async fn read_hello(
    reader: &mut ReadHalf<BoxedStream>,
    buffer: &mut Vec<u8>,
) -> TransportResult<String> {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        if let Some((kind, payload, consumed)) = try_deserialize_frame(buffer)? {
            buffer.drain(..consumed);
            if kind != FrameKind::Hello {
                return Err(TransportError::Handshake(format!(
                    "expected hello, got {kind:?}"
                )));
            }
            let peer = String::from_utf8(payload)
                .map_err(|e| TransportError::Handshake(format!("invalid instance id: {e}")))?;
            if peer.is_empty() {
                return Err(TransportError::Handshake("empty instance id".to_string()));
            }
            return Ok(peer);
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::Handshake(
                "connection closed before hello".to_string(),
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Root side: accept peers until shutdown.
async fn accept_loop<C: MessageCodec>(shared: Arc<Shared<C>>, mut listener: ChannelListener) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(stream) => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { serve_connection(shared, stream).await });
            }
            Err(e) => {
                tracing::warn!("pipe accept failed: {}", e);
                tokio::time::sleep(shared.config.initial_reconnect_delay).await;
            }
        }
    }
    tracing::debug!("pipe accept loop stopped");
}

async fn serve_connection<C: MessageCodec>(shared: Arc<Shared<C>>, stream: BoxedStream) {
    let (mut reader, writer) = tokio::io::split(stream);
    let mut buffer = Vec::new();

    let handshake = tokio::time::timeout(
        shared.config.connection_timeout,
        read_hello(&mut reader, &mut buffer),
    )
    .await;
    let peer = match handshake {
        Ok(Ok(peer)) => peer,
        Ok(Err(e)) => {
            tracing::warn!("rejecting pipe connection: {}", e);
            shared.metrics.record_frame_rejected();
            return;
        }
        Err(_) => {
            tracing::warn!("rejecting pipe connection: no hello within timeout");
            return;
        }
    };

    let link = shared.register_link(peer, writer);
    shared.read_loop(&link, &mut reader, &mut buffer).await;
    shared.drop_link(&link);
}

/// Client side: keep one link to the root alive until shutdown.
async fn connect_loop<C: MessageCodec>(shared: Arc<Shared<C>>) {
    let server = shared.config.server_channel();
    let server_name = shared.config.server_name.clone();
    let hello = match serialize_frame(FrameKind::Hello, shared.config.instance_id.as_bytes()) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("cannot encode hello for {}: {}", shared.config.instance_id, e);
            shared.gave_up.store(true, Ordering::SeqCst);
            return;
        }
    };
    let mut reconnect = ReconnectState::new(shared.config.initial_reconnect_delay);

    loop {
        let stream = match establish_connection(&shared, &server, &mut reconnect).await {
            Ok(stream) => stream,
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::warn!("giving up on pipe connection to {}: {}", server, e);
                shared.gave_up.store(true, Ordering::SeqCst);
                shared.link_changed.notify_waiters();
                return;
            }
        };

        let (mut reader, mut writer) = tokio::io::split(stream);
        let greeted = async {
            writer.write_all(&hello).await?;
            writer.flush().await
        };
        if let Err(e) = greeted.await {
            tracing::debug!("hello to {} failed: {}", server, e);
            reconnect.failure_count += 1;
            shared.metrics.record_connection_failure();
            continue;
        }

        let link = shared.register_link(server_name.clone(), writer);
        let mut buffer = Vec::new();
        shared.read_loop(&link, &mut reader, &mut buffer).await;
        shared.drop_link(&link);

        if shared.shutdown.is_cancelled() {
            break;
        }
        tracing::debug!("pipe link to {} lost, reconnecting", server);
    }
    tracing::debug!("pipe connect loop stopped");
}

async fn establish_connection<C: MessageCodec>(
    shared: &Shared<C>,
    channel: &ChannelName,
    reconnect: &mut ReconnectState,
) -> TransportResult<BoxedStream> {
    let config = &shared.config;
    loop {
        if let Some(max_failures) = config.max_connection_failures {
            if reconnect.failure_count >= max_failures {
                return Err(TransportError::Unavailable {
                    target: channel.to_string(),
                    reason: format!("{} consecutive connection failures", reconnect.failure_count),
                });
            }
        }

        if reconnect.failure_count > 0 {
            tokio::select! {
                _ = shared.shutdown.cancelled() => return Err(TransportError::Closed),
                _ = tokio::time::sleep(reconnect.current_delay) => {}
            }
            reconnect.current_delay =
                std::cmp::min(reconnect.current_delay * 2, config.max_reconnect_delay);
        }

        shared.metrics.record_connection_attempt();
        let attempt = tokio::select! {
            _ = shared.shutdown.cancelled() => return Err(TransportError::Closed),
            attempt = tokio::time::timeout(config.connection_timeout, channel::connect(channel)) => attempt,
        };

        match attempt {
            Ok(Ok(stream)) => {
                if reconnect.failure_count > 0 {
                    tracing::debug!(
                        "connected to {} after {} failures",
                        channel,
                        reconnect.failure_count
                    );
                }
                reconnect.reset(config.initial_reconnect_delay);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::debug!("connect to {} failed: {}", channel, e);
                reconnect.failure_count += 1;
                shared.metrics.record_connection_failure();
            }
            Err(_) => {
                tracing::debug!("connect to {} timed out", channel);
                reconnect.failure_count += 1;
                shared.metrics.record_connection_failure();
            }
        }
    }
}

/// Duplex transport over an OS interprocess channel.
///
/// The root instance (`instance_id == server_name`) binds its channel and
/// accepts peers; each peer must announce itself with a `Hello` frame and is
/// then reachable by its instance id. Every other instance runs a background
/// connector that keeps a single link to the root, reconnecting with
/// exponential backoff.
///
/// Clients only reach the root. Envelopes addressed to another instance are
/// refused with [`TransportError::Unavailable`] so the broker can try a
/// different router.
pub struct PipeTransport<C: MessageCodec = JsonCodec> {
    name: String,
    shared: Arc<Shared<C>>,
    inbound_rx: Mutex<Option<InboundReceiver>>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl PipeTransport<JsonCodec> {
    /// Open a pipe transport with the JSON codec.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the root fails to bind its channel.
    pub fn open(config: PipeConfig) -> TransportResult<Self> {
        Self::open_with_codec(config, JsonCodec)
    }
}

impl<C: MessageCodec> PipeTransport<C> {
    /// Open a pipe transport with a custom codec.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the root fails to bind its channel.
    pub fn open_with_codec(config: PipeConfig, codec: C) -> TransportResult<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let name = format!("pipe:{}.{}", config.namespace, config.instance_id);
        let is_server = config.is_server();
        let listener = if is_server {
            Some(ChannelListener::bind(&config.server_channel())?)
        } else {
            None
        };

        let shared = Arc::new(Shared {
            config,
            codec,
            links: DashMap::new(),
            link_changed: Notify::new(),
            inbound_tx,
            shutdown: CancellationToken::new(),
            metrics: MetricsRecorder::default(),
            next_link_id: AtomicU64::new(1),
            gave_up: AtomicBool::new(false),
        });

        let background = match listener {
            Some(listener) => {
                tracing::debug!("{} listening on {}", name, shared.config.server_channel());
                tokio::spawn(accept_loop(Arc::clone(&shared), listener))
            }
            None => {
                tracing::debug!("{} connecting to {}", name, shared.config.server_channel());
                tokio::spawn(connect_loop(Arc::clone(&shared)))
            }
        };

        Ok(Self {
            name,
            shared,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            background: Mutex::new(Some(background)),
        })
    }

    /// Configuration this transport was opened with.
    pub fn config(&self) -> &PipeConfig {
        &self.shared.config
    }

    /// Whether this transport is the listening root.
    pub fn is_server(&self) -> bool {
        self.shared.config.is_server()
    }

    /// Whether a link to `instance` is currently up.
    pub fn is_connected(&self, instance: &str) -> bool {
        self.shared.links.contains_key(instance)
    }

    /// Instance ids with a live link.
    pub fn connected_peers(&self) -> Vec<String> {
        self.shared
            .links
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Snapshot of the transport counters.
    pub fn metrics(&self) -> PipeMetrics {
        self.shared.metrics.snapshot()
    }

    /// Wait until a link to `instance` is up or `deadline` passes.
    ///
    /// Returns whether the link is up.
    pub async fn wait_for_link(&self, instance: &str, deadline: Instant) -> bool {
        loop {
            let notified = self.shared.link_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_connected(instance) {
                return true;
            }
            tokio::select! {
                _ = notified.as_mut() => {}
                _ = tokio::time::sleep_until(deadline) => return self.is_connected(instance),
                _ = self.shared.shutdown.cancelled() => return false,
            }
        }
    }

    fn target_for(&self, envelope: &Envelope) -> TransportResult<String> {
        let config = &self.shared.config;
        let recipient = &envelope.recipient().instance;
        if recipient == &config.instance_id {
            return Err(TransportError::Unavailable {
                target: recipient.clone(),
                reason: "recipient is this instance".to_string(),
            });
        }
        if !config.is_server() && recipient != &config.server_name {
            return Err(TransportError::Unavailable {
                target: recipient.clone(),
                reason: format!("pipe clients only reach {}", config.server_name),
            });
        }
        Ok(recipient.clone())
    }
}

#[async_trait]
impl<C: MessageCodec> DuplexTransport for PipeTransport<C> {
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
        let target = self.target_for(envelope)?;
        let payload = self.shared.codec.encode(envelope)?;
        let frame = serialize_frame(FrameKind::Envelope, &payload)?;
        let shared = &self.shared;

        loop {
            if shared.shutdown.is_cancelled() {
                return Err(TransportError::Closed);
            }
            if cancel.is_cancelled() {
                return Err(TransportError::Canceled);
            }

            let notified = shared.link_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(link) = shared.link_to(&target) {
                match link.write_frame(frame.clone()).await {
                    Ok(()) => {
                        tracing::debug!(
                            "{} sent envelope {} to {} ({} bytes)",
                            self.name,
                            envelope.id(),
                            target,
                            frame.len()
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::debug!("send to {} failed: {} - retrying", target, e);
                        shared.drop_link(&link);
                        continue;
                    }
                }
            }

            if shared.gave_up.load(Ordering::SeqCst) {
                return Err(TransportError::Unavailable {
                    target,
                    reason: "connector gave up".to_string(),
                });
            }

            tokio::select! {
                _ = notified.as_mut() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(TransportError::DeadlineExceeded { target });
                }
                _ = cancel.cancelled() => return Err(TransportError::Canceled),
                _ = shared.shutdown.cancelled() => return Err(TransportError::Closed),
            }
        }
    }

    async fn close(&self) {
        self.shared.shutdown.cancel();
        let links: Vec<Arc<Link>> = self
            .shared
            .links
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for link in links {
            self.shared.drop_link(&link);
        }

        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = background {
            if let Err(e) = handle.await {
                tracing::warn!("{} background task failed: {}", self.name, e);
            }
        }
        tracing::debug!("{} closed", self.name);
    }
}

impl<C: MessageCodec> Drop for PipeTransport<C> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use courier_core::{Endpoint, Payload};

    use super::*;

    fn config(dir: &std::path::Path, instance: &str) -> PipeConfig {
        PipeConfig::local("test", "root", instance).with_socket_dir(dir)
    }

    fn envelope(from: &str, to: &str) -> Envelope {
        Envelope::request(
            Payload::new("Ping", &1u8).expect("payload"),
            Endpoint::new("app", from),
            Endpoint::new("app", to),
            Duration::from_secs(5),
        )
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_client_refuses_non_root_recipients() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = PipeTransport::open(config(dir.path(), "w1")).expect("client");

        let result = client
            .send(&envelope("w1", "w2"), soon(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::Unavailable { .. })));

        let result = client
            .send(&envelope("w1", "w1"), soon(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_hello_registers_link_under_instance_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = PipeTransport::open(config(dir.path(), "root")).expect("server");
        let client = PipeTransport::open(config(dir.path(), "w1")).expect("client");

        assert!(server.wait_for_link("w1", soon()).await);
        assert!(client.wait_for_link("root", soon()).await);
        assert_eq!(server.connected_peers(), vec!["w1".to_string()]);
        assert_eq!(server.metrics().links_established, 1);

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn test_send_times_out_without_link() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = PipeTransport::open(config(dir.path(), "root")).expect("server");

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = server
            .send(&envelope("root", "absent"), deadline, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::DeadlineExceeded { .. })));
    }

    #[tokio::test]
    async fn test_client_gives_up_after_max_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = PipeTransport::open(
            config(dir.path(), "w1")
                .with_reconnect_delay(Duration::from_millis(1), Duration::from_millis(2))
                .with_max_connection_failures(Some(2)),
        )
        .expect("client");

        let result = client
            .send(&envelope("w1", "root"), soon(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::Unavailable { .. })));
        assert_eq!(client.metrics().connection_failures, 2);
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_sends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = PipeTransport::open(config(dir.path(), "root")).expect("server");
        server.close().await;

        let result = server
            .send(&envelope("root", "w1"), soon(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(!dir.path().join("test.root.sock").exists());
    }
}
