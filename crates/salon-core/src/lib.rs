//! # salon-core
//!
//! Shared types for the salon chat relay: the `{message, username}` wire
//! envelope and its codec, branded identifiers, broadcast group keys, and the
//! contracts the relay consumes for room lookup and password verification.
//!
//! Nothing in this crate performs I/O.

pub mod envelope;
pub mod ids;
pub mod room;
pub mod security;

pub use envelope::{Envelope, ANONYMOUS_USERNAME, SYSTEM_USERNAME};
pub use ids::{ConnectionId, GroupKey};
pub use room::{DirectoryError, Room, RoomDirectory, RoomIdentifier};
pub use security::{CredentialError, CredentialVerifier, Pbkdf2Hasher};
