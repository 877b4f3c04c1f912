//! Connection failures and the close codes they map to.

use salon_core::{CredentialError, DirectoryError};
use thiserror::Error;

/// Room not found and creation not requested or not permitted.
pub const CLOSE_ROOM_NOT_FOUND: u16 = 4000;
/// Missing or wrong password for an existing room.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Another connection created the same room first.
pub const CLOSE_CREATION_CONFLICT: u16 = 4009;
/// Directory or credential backend failure.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Server shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Heartbeat timeout or slow-consumer eviction.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Why a connection was refused during authentication.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("room not found")]
    RoomNotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("room creation conflict: {0}")]
    CreationConflict(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Authentication attempted on a session that is not connecting.
    #[error("session is not awaiting authentication")]
    InvalidState,
}

impl ConnectError {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::RoomNotFound => CLOSE_ROOM_NOT_FOUND,
            Self::Unauthorized => CLOSE_UNAUTHORIZED,
            Self::CreationConflict(_) => CLOSE_CREATION_CONFLICT,
            Self::Unavailable(_) | Self::InvalidState => CLOSE_INTERNAL_ERROR,
        }
    }

    /// Metric label for `ws_rejections_total`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "room_not_found",
            Self::Unauthorized => "unauthorized",
            Self::CreationConflict(_) => "creation_conflict",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidState => "invalid_state",
        }
    }
}

impl From<DirectoryError> for ConnectError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Conflict(name) => Self::CreationConflict(name),
            DirectoryError::Unavailable(msg) => Self::Unavailable(msg),
        }
    }
}

impl From<CredentialError> for ConnectError {
    fn from(err: CredentialError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ConnectError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Unavailable(format!("blocking task failed: {err}"))
    }
}
