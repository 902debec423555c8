//! Session configuration.
//!
//! Plain values, no discovery. Durations are stored in milliseconds so the
//! structs can be loaded from JSON as-is:
//!
//! ```
//! use mprpc::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "call_timeout_ms": 2000 }"#).unwrap();
//! assert_eq!(config.call_timeout().as_millis(), 2000);
//! assert_eq!(config.heartbeat_interval_ms, 1000);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default timeout for `call()`.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 6000;

/// Default interval between client heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Default silence after which a peer is considered gone.
pub const DEFAULT_LIVENESS_WINDOW_MS: u64 = 3000;

/// Default granularity of the network loop timer.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Client session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout used by `call()` when none is given.
    pub call_timeout_ms: u64,
    /// How often a heartbeat is sent.
    pub heartbeat_interval_ms: u64,
    /// How long without a heartbeat reply before the session is lost.
    pub liveness_window_ms: u64,
    /// Network loop timer tick.
    pub poll_interval_ms: u64,
    /// Delay between reconnect attempts after a lost session. `None` disables
    /// reconnection.
    pub reconnect_interval_ms: Option<u64>,
    /// Largest envelope a call, async call or notification may carry.
    /// Larger ones are refused before they are queued.
    pub max_payload_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            liveness_window_ms: DEFAULT_LIVENESS_WINDOW_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reconnect_interval_ms: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl ClientConfig {
    /// Parse from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    /// Timer tick, never zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Option<Duration> {
        self.reconnect_interval_ms.map(Duration::from_millis)
    }
}

/// Server session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long a connection may stay silent before it is closed.
    pub liveness_window_ms: u64,
    /// Liveness sweep tick.
    pub poll_interval_ms: u64,
    /// Largest envelope the server sends; larger replies become errors.
    pub max_payload_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            liveness_window_ms: DEFAULT_LIVENESS_WINDOW_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl ServerConfig {
    /// Parse from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    /// Timer tick, never zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
