use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use ringsync_core::{
    FieldValue, Mutation, QueueItem, QueueItemId, Row, Table, UserId,
    field_value::{decode_row, encode_row, text_field},
    merge::{Winner, pick_winner},
    mutation::{DELETED_AT_FIELD, UPLOADED_FIELD},
};

use crate::error::StorageError;
use crate::traits::{CachedRow, LegacySnapshot, LegacySource, LocalStore, MergeStats};

const LEGACY_SETTINGS: &str = "settings";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Load records from a single-device export into the legacy tables.
    /// Existing records with the same key are replaced.
    pub fn import_legacy_rows(&mut self, table: Table, rows: &[Row]) -> Result<usize, StorageError> {
        if !matches!(
            table,
            Table::Catches | Table::Projects | Table::RingBatches | Table::SpeciesOverrides
        ) {
            return Err(StorageError::InvalidLegacy(format!(
                "{table} never existed in single-device storage"
            )));
        }
        let tx = self.conn.transaction()?;
        for row in rows {
            let key = text_field(row, table.key_field()).ok_or_else(|| {
                StorageError::InvalidLegacy(format!(
                    "{table} record without `{}`",
                    table.key_field()
                ))
            })?;
            tx.execute(
                "INSERT INTO legacy_records (collection, record_key, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, record_key) DO UPDATE SET data = excluded.data",
                rusqlite::params![table.as_str(), key, encode_row(row)?],
            )?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn import_legacy_settings(&mut self, settings: &Row) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO legacy_records (collection, record_key, data) VALUES (?1, ?1, ?2)
             ON CONFLICT(collection, record_key) DO UPDATE SET data = excluded.data",
            rusqlite::params![LEGACY_SETTINGS, encode_row(settings)?],
        )?;
        Ok(())
    }

    fn legacy_rows(&self, collection: &str) -> Result<Vec<Row>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM legacy_records WHERE collection = ?1 ORDER BY seq")?;
        let blobs = stmt
            .query_map(rusqlite::params![collection], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        blobs
            .iter()
            .map(|bytes| decode_row(bytes).map_err(StorageError::from))
            .collect()
    }
}

fn cache_table(table: Table) -> Result<&'static str, StorageError> {
    if table.is_cached() {
        Ok(table.as_str())
    } else {
        Err(StorageError::NotCached(table))
    }
}

fn read_cached(
    conn: &Connection,
    table: Table,
    key: &str,
) -> Result<Option<CachedRow>, StorageError> {
    let sql = format!(
        "SELECT row_key, data, uploaded, deleted_at FROM {} WHERE row_key = ?1",
        cache_table(table)?
    );
    let raw = conn
        .query_row(&sql, rusqlite::params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })
        .optional()?;
    raw.map(|(key, data, uploaded, deleted_at)| {
        Ok::<_, StorageError>(CachedRow {
            key,
            row: decode_row(&data)?,
            uploaded,
            deleted_at,
        })
    })
    .transpose()
}

fn write_cached(conn: &Connection, table: Table, row: &Row) -> Result<(), StorageError> {
    let key = text_field(row, table.key_field()).ok_or_else(|| {
        ringsync_core::CoreError::MissingKey {
            table: table.to_string(),
            field: table.key_field().to_string(),
        }
    })?;
    let uploaded = row.get(UPLOADED_FIELD).is_some_and(FieldValue::is_truthy);
    // A tombstone the clock cannot place still hides the row.
    let deleted_at = row
        .get(DELETED_AT_FIELD)
        .filter(|v| !v.is_null())
        .map(|v| v.as_epoch_ms().unwrap_or(0));
    let sql = format!(
        "INSERT INTO {} (row_key, data, uploaded, deleted_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(row_key) DO UPDATE SET data = excluded.data, uploaded = excluded.uploaded, deleted_at = excluded.deleted_at",
        cache_table(table)?
    );
    conn.execute(
        &sql,
        rusqlite::params![key, encode_row(row)?, uploaded, deleted_at],
    )?;
    Ok(())
}

fn delete_cached(conn: &Connection, table: Table, key: &str) -> Result<(), StorageError> {
    let sql = format!("DELETE FROM {} WHERE row_key = ?1", cache_table(table)?);
    conn.execute(&sql, rusqlite::params![key])?;
    Ok(())
}

/// Rewrite one column of a cached row. Rows that are not cached locally are left alone.
fn set_cached_field(
    conn: &Connection,
    table: Table,
    key: &str,
    field: &str,
    value: FieldValue,
) -> Result<(), StorageError> {
    if let Some(mut cached) = read_cached(conn, table, key)? {
        cached.row.insert(field.to_string(), value);
        write_cached(conn, table, &cached.row)?;
    }
    Ok(())
}

/// Optimistic local effect of a mutation.
fn apply_mutation(conn: &Connection, mutation: &Mutation) -> Result<(), StorageError> {
    match mutation {
        Mutation::Upsert { table, row } => write_cached(conn, *table, row)?,

        Mutation::BatchUpsert { table, rows } => {
            for row in rows {
                write_cached(conn, *table, row)?;
            }
        }

        Mutation::Delete { table, id } => delete_cached(conn, *table, id)?,

        Mutation::SpeciesOverrideUpsert {
            species_name,
            fields,
        } => {
            let table = Table::SpeciesOverrides;
            let mut row = read_cached(conn, table, species_name)?
                .map(|c| c.row)
                .unwrap_or_default();
            row.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            row.insert(
                table.key_field().to_string(),
                FieldValue::Text(species_name.clone()),
            );
            write_cached(conn, table, &row)?;
        }

        Mutation::SpeciesOverrideDelete { species_name } => {
            delete_cached(conn, Table::SpeciesOverrides, species_name)?
        }

        Mutation::MarkUploaded { ids } => {
            for id in ids {
                set_cached_field(
                    conn,
                    Table::Catches,
                    id,
                    UPLOADED_FIELD,
                    FieldValue::Boolean(true),
                )?;
            }
        }

        Mutation::SoftDelete {
            table,
            id,
            deleted_at,
        } => set_cached_field(
            conn,
            *table,
            id,
            DELETED_AT_FIELD,
            FieldValue::Timestamp(*deleted_at),
        )?,

        Mutation::Restore { table, id } => {
            set_cached_field(conn, *table, id, DELETED_AT_FIELD, FieldValue::Null)?
        }

        // Profiles have no local mirror.
        Mutation::ProfileUpdate { .. } => {}
    }
    Ok(())
}

const QUEUE_COLUMNS: &str = "id, table_name, payload, owner_id, created_at, attempts, last_error";

type RawQueueRow = (i64, String, Vec<u8>, String, i64, i64, Option<String>);

fn read_queue_row(row: &rusqlite::Row) -> rusqlite::Result<RawQueueRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode_queue_row(raw: RawQueueRow) -> Result<QueueItem, StorageError> {
    let (id, table_name, payload, owner, created_at, attempts, last_error) = raw;
    Ok(QueueItem {
        id: QueueItemId::from_raw(id),
        table: Table::parse(&table_name)?,
        mutation: Mutation::from_msgpack(&payload)?,
        owner: UserId::new(owner),
        created_at: created_at.max(0) as u64,
        attempts: attempts.max(0) as u32,
        last_error,
    })
}

impl LocalStore for SqliteStorage {
    fn enqueue(
        &mut self,
        mutation: &Mutation,
        owner: &UserId,
        created_at: u64,
    ) -> Result<QueueItemId, StorageError> {
        mutation.validate()?;
        let payload = mutation.to_msgpack()?;

        let tx = self.conn.transaction()?;
        apply_mutation(&tx, mutation)?;
        tx.execute(
            "INSERT INTO sync_queue (table_name, operation, payload, owner_id, created_at, attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            rusqlite::params![
                mutation.table().as_str(),
                mutation.kind_name(),
                payload,
                owner.as_str(),
                created_at as i64,
            ],
        )?;
        let id = QueueItemId::from_raw(tx.last_insert_rowid());
        tx.commit()?;

        debug!(
            item = %id,
            table = %mutation.table(),
            op = mutation.kind_name(),
            %owner,
            "mutation queued"
        );
        Ok(id)
    }

    fn queue_len(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn list_queue(&self) -> Result<Vec<QueueItem>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY id"))?;
        let raws = stmt
            .query_map([], read_queue_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(decode_queue_row).collect()
    }

    fn get_queue_item(&self, id: QueueItemId) -> Result<Option<QueueItem>, StorageError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1"),
                rusqlite::params![id.raw()],
                read_queue_row,
            )
            .optional()?;
        raw.map(decode_queue_row).transpose()
    }

    fn remove_queue_item(&mut self, id: QueueItemId) -> Result<bool, StorageError> {
        let removed = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?1", rusqlite::params![id.raw()])?;
        Ok(removed > 0)
    }

    fn record_failure(&mut self, id: QueueItemId, error: &str) -> Result<u32, StorageError> {
        let attempts = self
            .conn
            .query_row(
                "UPDATE sync_queue SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1 RETURNING attempts",
                rusqlite::params![id.raw(), error],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("queue item {id}")))?;
        Ok(attempts.max(0) as u32)
    }

    fn reset_attempts(&mut self, id: QueueItemId) -> Result<bool, StorageError> {
        let updated = self.conn.execute(
            "UPDATE sync_queue SET attempts = 0, last_error = NULL WHERE id = ?1",
            rusqlite::params![id.raw()],
        )?;
        Ok(updated > 0)
    }

    fn get_cached(&self, table: Table, key: &str) -> Result<Option<CachedRow>, StorageError> {
        read_cached(&self.conn, table, key)
    }

    fn list_cached(&self, table: Table) -> Result<Vec<CachedRow>, StorageError> {
        let sql = format!(
            "SELECT row_key, data, uploaded, deleted_at FROM {} ORDER BY row_key",
            cache_table(table)?
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = Vec::with_capacity(raws.len());
        for (key, data, uploaded, deleted_at) in raws {
            result.push(CachedRow {
                key,
                row: decode_row(&data)?,
                uploaded,
                deleted_at,
            });
        }
        Ok(result)
    }

    fn cached_count(&self, table: Table) -> Result<u64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", cache_table(table)?);
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn merge_pulled(&mut self, table: Table, rows: Vec<Row>) -> Result<MergeStats, StorageError> {
        cache_table(table)?;
        let tx = self.conn.transaction()?;
        let mut stats = MergeStats::default();
        for remote in rows {
            let Some(key) = text_field(&remote, table.key_field()) else {
                debug!(%table, "skipping pulled row without key");
                continue;
            };
            let local = read_cached(&tx, table, key)?;
            match pick_winner(local.as_ref().map(|c| &c.row), &remote) {
                Winner::Remote => {
                    write_cached(&tx, table, &remote)?;
                    stats.taken_remote += 1;
                }
                Winner::Local => stats.kept_local += 1,
            }
        }
        tx.commit()?;
        Ok(stats)
    }

    fn get_meta(&self, key: &str) -> Result<Option<i64>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_meta(&mut self, key: &str, value: i64) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn delete_meta(&mut self, key: &str) -> Result<bool, StorageError> {
        let removed = self
            .conn
            .execute("DELETE FROM meta WHERE key = ?1", rusqlite::params![key])?;
        Ok(removed > 0)
    }

    fn cache_owner(&self) -> Result<Option<UserId>, StorageError> {
        let owner: Option<String> = self
            .conn
            .query_row("SELECT user_id FROM cache_owner WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        Ok(owner.map(UserId::new))
    }

    fn set_cache_owner(&mut self, user: &UserId) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO cache_owner (id, user_id) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET user_id = excluded.user_id",
            rusqlite::params![user.as_str()],
        )?;
        Ok(())
    }

    fn clear_cached(&mut self, table: Table) -> Result<u64, StorageError> {
        let sql = format!("DELETE FROM {}", cache_table(table)?);
        let removed = self.conn.execute(&sql, [])?;
        debug!(%table, removed, "cache cleared");
        Ok(removed as u64)
    }
}

impl LegacySource for SqliteStorage {
    fn load_legacy(&self) -> Result<LegacySnapshot, StorageError> {
        let settings = self.legacy_rows(LEGACY_SETTINGS)?.into_iter().next();
        Ok(LegacySnapshot {
            catches: self.legacy_rows(Table::Catches.as_str())?,
            projects: self.legacy_rows(Table::Projects.as_str())?,
            ring_batches: self.legacy_rows(Table::RingBatches.as_str())?,
            species_overrides: self.legacy_rows(Table::SpeciesOverrides.as_str())?,
            settings,
        })
    }
}
