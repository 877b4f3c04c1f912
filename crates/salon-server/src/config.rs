//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the chat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue length per connection.
    pub send_queue_capacity: usize,
    /// Lifetime drops before a slow client is evicted.
    pub max_dropped_messages: u64,
    /// Ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close after this many seconds without client activity.
    pub heartbeat_timeout_secs: u64,
    /// How long shutdown waits for sessions to finish.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            max_dropped_messages: 100,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            shutdown_timeout_secs: 10,
        }
    }
}
