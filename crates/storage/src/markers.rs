use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use ringsync_core::UserId;

use crate::error::StorageError;
use crate::traits::MarkerStore;

/// Migration markers in their own database file, independent of the cache.
pub struct SqliteMarkerStore {
    conn: Connection,
}

impl SqliteMarkerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_marker_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_marker_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn marked_at(&self, user: &UserId) -> Result<Option<u64>, StorageError> {
        let at: Option<i64> = self
            .conn
            .query_row(
                "SELECT marked_at FROM migration_markers WHERE user_id = ?1",
                rusqlite::params![user.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at.map(|ms| ms.max(0) as u64))
    }
}

impl MarkerStore for SqliteMarkerStore {
    fn is_migrated(&self, user: &UserId) -> Result<bool, StorageError> {
        Ok(self.marked_at(user)?.is_some())
    }

    fn mark_migrated(&mut self, user: &UserId, at: u64) -> Result<(), StorageError> {
        // First marker wins; re-marking keeps the original timestamp.
        self.conn.execute(
            "INSERT OR IGNORE INTO migration_markers (user_id, marked_at) VALUES (?1, ?2)",
            rusqlite::params![user.as_str(), at as i64],
        )?;
        Ok(())
    }
}
