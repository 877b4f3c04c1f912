//! Settings type definitions.
//!
//! All types use camelCase field names in JSON and `#[serde(default)]`, so a
//! partial settings file only needs the keys it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "logging": { "level": "debug", "moduleLevels": { "salon_store": "trace" } }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SalonSettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub logging: LoggingSettings,
}

/// Listener, transport limits and connection lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks an ephemeral port.
    pub port: u16,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Outbound queue length per connection.
    pub send_queue_capacity: usize,
    /// Dropped deliveries after which a slow client is evicted.
    pub max_dropped_messages: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    /// How long shutdown waits for sessions to finish.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            max_dropped_messages: 100,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// SQLite file holding the room directory. A leading `~/` is expanded.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.salon/salon.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// PBKDF2 rounds for newly created room passwords.
    pub pbkdf2_iterations: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: 600_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-target overrides, e.g. `{"salon_server": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}
