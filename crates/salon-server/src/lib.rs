//! # salon-server
//!
//! Axum HTTP + `WebSocket` server for room-based chat.
//!
//! - `WebSocket` endpoint `/ws/chat/{room}/`: authentication before the
//!   handshake completes, then relay of `{message, username}` envelopes
//! - Broadcast groups: per-room member sets with non-blocking fan-out and
//!   slow-consumer eviction
//! - Heartbeat pings, `/health`, Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod groups;
pub mod health;
pub mod metrics;
pub mod params;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ConnectError;
pub use server::SalonServer;
