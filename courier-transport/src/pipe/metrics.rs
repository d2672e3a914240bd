//! Counters for pipe transports.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a pipe transport's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipeMetrics {
    /// Outbound connection attempts (clients only).
    pub connection_attempts: u64,
    /// Failed outbound connection attempts.
    pub connection_failures: u64,
    /// Links that completed the handshake.
    pub links_established: u64,
    /// Links that were torn down.
    pub links_lost: u64,
    /// Envelope frames written.
    pub frames_sent: u64,
    /// Envelope frames read and decoded.
    pub frames_received: u64,
    /// Frames dropped because of a wire or codec error.
    pub frames_rejected: u64,
    /// Bytes written, headers included.
    pub bytes_sent: u64,
    /// Bytes read, headers included.
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    connection_attempts: AtomicU64,
    connection_failures: AtomicU64,
    links_established: AtomicU64,
    links_lost: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl MetricsRecorder {
    pub(crate) fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_link_established(&self) {
        self.links_established.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_link_lost(&self) {
        self.links_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PipeMetrics {
        PipeMetrics {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            links_established: self.links_established.load(Ordering::Relaxed),
            links_lost: self.links_lost.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}
