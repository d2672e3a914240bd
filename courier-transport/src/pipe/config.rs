//! Configuration for pipe transports.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::channel::ChannelName;

/// Configuration for a pipe transport and its reconnection behavior.
///
/// The instance whose `instance_id` equals `server_name` is the root: it
/// listens on its channel and accepts peers. Every other instance connects
/// to the root as a client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Prefix shared by every channel of one application.
    pub namespace: String,

    /// Instance id of the root instance.
    pub server_name: String,

    /// Instance id of this process.
    pub instance_id: String,

    /// Directory holding unix socket files. `None` uses the OS temp dir.
    /// Ignored on Windows.
    pub socket_dir: Option<PathBuf>,

    /// Initial delay before attempting reconnection
    pub initial_reconnect_delay: Duration,

    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,

    /// Timeout for a single connection attempt and for the handshake
    pub connection_timeout: Duration,

    /// Maximum number of consecutive connection failures before giving up
    /// None means unlimited retries
    pub max_connection_failures: Option<u32>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            namespace: "courier".to_string(),
            server_name: "root".to_string(),
            instance_id: "root".to_string(),
            socket_dir: None,
            initial_reconnect_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(5),
            max_connection_failures: None, // Unlimited retries by default
        }
    }
}

impl PipeConfig {
    /// Create a configuration for `instance_id` in `namespace`, rooted at
    /// `server_name`.
    pub fn new(
        namespace: impl Into<String>,
        server_name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            server_name: server_name.into(),
            instance_id: instance_id.into(),
            ..Self::default()
        }
    }

    /// Create a configuration tuned for processes on the same machine:
    /// fast reconnects and a bounded number of attempts.
    pub fn local(
        namespace: impl Into<String>,
        server_name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_secs(1),
            connection_timeout: Duration::from_millis(500),
            max_connection_failures: Some(50),
            ..Self::new(namespace, server_name, instance_id)
        }
    }

    /// Put unix socket files under `dir`.
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    /// Set the reconnect backoff bounds.
    pub fn with_reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Set the per-attempt connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Give up after `failures` consecutive failed attempts. `None` retries forever.
    pub fn with_max_connection_failures(mut self, failures: Option<u32>) -> Self {
        self.max_connection_failures = failures;
        self
    }

    /// Whether this instance is the root that listens for peers.
    pub fn is_server(&self) -> bool {
        self.instance_id == self.server_name
    }

    /// Channel name of `instance` in this namespace.
    pub fn channel_name(&self, instance: &str) -> ChannelName {
        ChannelName::derive(&self.namespace, instance, self.socket_dir.as_deref())
    }

    /// Channel name of the root instance.
    pub fn server_channel(&self) -> ChannelName {
        self.channel_name(&self.server_name)
    }
}
