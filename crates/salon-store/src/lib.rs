//! # salon-store
//!
//! SQLite-backed room directory: the persisted side of the relay, holding
//! each room's unique name, password hash and creation timestamp.

pub mod database;
pub mod error;
pub mod rooms;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use rooms::RoomRepo;
