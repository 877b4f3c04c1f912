//! Room records and the directory contract used to find or create them.

use std::fmt;

/// A password-protected chat room as stored by the directory.
///
/// Carries the password hash, so it has no serde impls.
#[derive(Clone, PartialEq, Eq)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub password_hash: String,
    pub created_at: String,
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// How a client addressed a room in the connection path.
///
/// Purely numeric identifiers address rooms by id and never fall back to a
/// name lookup; everything else addresses rooms by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomIdentifier {
    /// All ASCII digits. Kept as text: a value too large for the store's
    /// integer ids simply matches nothing.
    Numeric(String),
    Name(String),
}

impl RoomIdentifier {
    pub fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            Self::Numeric(raw.to_string())
        } else {
            Self::Name(raw.to_string())
        }
    }

    /// The identifier exactly as the client sent it.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Numeric(s) | Self::Name(s) => s,
        }
    }
}

impl fmt::Display for RoomIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// A room with this name already exists (lost a concurrent create).
    #[error("room already exists: {0}")]
    Conflict(String),

    #[error("room directory unavailable: {0}")]
    Unavailable(String),
}

/// Lookup-or-create access to persisted rooms.
///
/// Implementations may block; callers run them off the async executor.
pub trait RoomDirectory: Send + Sync {
    fn find_room(&self, identifier: &RoomIdentifier) -> Result<Option<Room>, DirectoryError>;

    /// Create a room. Fails with [`DirectoryError::Conflict`] when the name is
    /// taken, never overwriting the existing record.
    fn create_room(&self, name: &str, password_hash: &str) -> Result<Room, DirectoryError>;
}
