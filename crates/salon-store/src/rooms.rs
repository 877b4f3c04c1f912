use chrono::Utc;
use rusqlite::{ErrorCode, OptionalExtension};
use tracing::{info, instrument};

use salon_core::{DirectoryError, Room, RoomDirectory, RoomIdentifier};

use crate::database::Database;
use crate::error::StoreError;

const SELECT_ROOM: &str = "SELECT id, name, password_hash, created_at FROM rooms";

fn map_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[derive(Clone)]
pub struct RoomRepo {
    db: Database,
}

impl RoomRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn get_by_id(&self, id: i64) -> Result<Option<Room>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(&format!("{SELECT_ROOM} WHERE id = ?1"), [id], map_room)
                .optional()
                .map_err(StoreError::from)
        })
    }

    #[instrument(skip(self))]
    pub fn get_by_name(&self, name: &str) -> Result<Option<Room>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(&format!("{SELECT_ROOM} WHERE name = ?1"), [name], map_room)
                .optional()
                .map_err(StoreError::from)
        })
    }

    /// Insert a new room. A taken name is a [`StoreError::Conflict`]; the
    /// existing row is left untouched.
    #[instrument(skip(self, password_hash))]
    pub fn create(&self, name: &str, password_hash: &str) -> Result<Room, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            match conn.execute(
                "INSERT INTO rooms (name, password_hash, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, password_hash, now],
            ) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    return Err(StoreError::Conflict(name.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
            let id = conn.last_insert_rowid();
            info!(room_id = id, room = name, "room created");
            Ok(Room {
                id,
                name: name.to_string(),
                password_hash: password_hash.to_string(),
                created_at: now,
            })
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM rooms", [], |row| row.get(0))
                .map_err(StoreError::from)
        })
    }
}

impl RoomDirectory for RoomRepo {
    fn find_room(&self, identifier: &RoomIdentifier) -> Result<Option<Room>, DirectoryError> {
        let found = match identifier {
            RoomIdentifier::Numeric(raw) => match raw.parse::<i64>() {
                Ok(id) => self.get_by_id(id)?,
                Err(_) => None,
            },
            RoomIdentifier::Name(name) => self.get_by_name(name)?,
        };
        Ok(found)
    }

    fn create_room(&self, name: &str, password_hash: &str) -> Result<Room, DirectoryError> {
        Ok(self.create(name, password_hash)?)
    }
}
