//! WebSocket connection handles, heartbeat, the chat state machine and the
//! session loop driving it.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
