//! Broker configuration.

use std::time::Duration;

use courier_core::Endpoint;
use serde::Deserialize;

/// Configuration for a [`Broker`](super::Broker).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Endpoint of this instance; the sender of every envelope and the
    /// default recipient.
    pub local_endpoint: Endpoint,

    /// Timeout used when a dispatch sets none.
    pub default_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            local_endpoint: Endpoint::new("courier", "root"),
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl BrokerConfig {
    /// Configuration for `local_endpoint` with the default timeout.
    pub fn new(local_endpoint: Endpoint) -> Self {
        Self {
            local_endpoint,
            ..Self::default()
        }
    }

    /// Replace the default timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.local_endpoint.to_string(), "courier/root");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: BrokerConfig = serde_json::from_str(
            r#"{"local_endpoint":{"application":"orders","instance":"w1","channel":null}}"#,
        )
        .expect("config");
        assert_eq!(config.local_endpoint, Endpoint::new("orders", "w1"));
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }
}
