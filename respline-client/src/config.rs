//! # Client Configuration
//!
//! Purpose: Collect the knobs a session and its transport pool need, with
//! defaults that work against a local server.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for a session and the transports it opens.
///
/// Deserializable so it can be embedded in an application's config file;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Disable Nagle on TCP transports.
    pub nodelay: bool,
    /// Optional TCP connect timeout in milliseconds. Requests themselves
    /// carry no timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Initial capacity of each transport's read buffer.
    pub read_buffer_capacity: usize,
    /// Maximum idle transports a pool keeps per address.
    pub max_idle_per_addr: usize,
}

impl ClientConfig {
    /// Default configuration pointed at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            nodelay: true,
            connect_timeout_ms: None,
            read_buffer_capacity: 8 * 1024,
            max_idle_per_addr: 8,
        }
    }
}
