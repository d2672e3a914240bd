//! Duplex transport over OS interprocess channels.
//!
//! One instance per namespace is the root: it binds the channel derived from
//! `(namespace, server_name)` and accepts peers. Other instances connect to
//! it and keep the link alive in the background.
//!
//! # Connection Lifecycle
//!
//! ```text
//! ┌──────────┐    connect     ┌───────────┐
//! │Disconnect├───────────────►│   Hello   │
//! │   ed     │◄──────┐        │   sent    │
//! └────┬─────┘       │        └─────┬─────┘
//!      │             │ link lost    │ link registered
//!      │ backoff     │              ▼
//!      ▼             │        ┌───────────┐
//! ┌──────────┐       └────────┤   Active  │
//! │Reconnect │                │   I/O     │
//! │  ing     │                └───────────┘
//! └──────────┘
//! ```
//!
//! # Backoff Strategy
//!
//! - Initial delay: configurable (default 100ms)
//! - Maximum delay: configurable (default 30s)
//! - Doubles after every consecutive failure, resets on success
//! - Optional cap on consecutive failures, after which sends fail fast
//!
//! # Configuration
//!
//! ```
//! use courier_transport::PipeConfig;
//!
//! let root = PipeConfig::local("orders", "root", "root");
//! let worker = PipeConfig::local("orders", "root", "worker-1");
//! assert!(root.is_server());
//! assert!(!worker.is_server());
//! ```

mod channel;
mod config;
mod core;
mod metrics;

pub use channel::ChannelName;
pub use config::PipeConfig;
pub use self::core::PipeTransport;
pub use metrics::PipeMetrics;
