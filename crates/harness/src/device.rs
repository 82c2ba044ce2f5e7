use ringsync_core::{
    Clock, FieldValue, ManualClock, Mutation, Row, SyncConfig, Table, UserId, field_value::row,
};
use ringsync_engine::{EngineError, MigrationState, SyncContext};
use ringsync_storage::{LocalStore, SqliteMarkerStore, SqliteStorage, StorageError};

use crate::MemoryRemote;

/// Wall-clock time every test device starts at.
pub const START_MS: u64 = 1_700_000_000_000;

/// A simulated phone: in-memory stores, a hand-driven clock, a shared remote.
pub struct TestDevice {
    pub ctx: SyncContext<MemoryRemote>,
    pub clock: ManualClock,
}

impl TestDevice {
    pub fn new(remote: MemoryRemote) -> Result<Self, EngineError> {
        Self::with_config(remote, SyncConfig::default())
    }

    pub fn with_config(remote: MemoryRemote, config: SyncConfig) -> Result<Self, EngineError> {
        let clock = ManualClock::new(START_MS);
        let ctx = SyncContext::new(
            config,
            SqliteStorage::open_in_memory()?,
            SqliteMarkerStore::open_in_memory()?,
            remote,
            Box::new(clock.clone()),
        )?;
        Ok(Self { ctx, clock })
    }

    /// Current device time as a row timestamp.
    pub fn now(&self) -> i64 {
        i64::try_from(self.clock.now_ms()).unwrap_or(i64::MAX)
    }

    pub fn remote(&self) -> &MemoryRemote {
        self.ctx.remote()
    }

    /// Sign in while offline so no pass runs yet.
    pub fn sign_in_offline(&mut self, user: &str) -> Result<MigrationState, EngineError> {
        self.ctx.set_online(false)?;
        self.ctx.sign_in(UserId::new(user))
    }

    /// Sign in and come online.
    pub fn sign_in_online(&mut self, user: &str) -> Result<MigrationState, EngineError> {
        self.ctx.set_online(true)?;
        self.ctx.sign_in(UserId::new(user))
    }

    pub fn upsert_catch(&mut self, id: &str, species: &str) -> Result<(), EngineError> {
        let row = catch_row(id, species, self.now());
        self.ctx.enqueue_mutation(Mutation::Upsert {
            table: Table::Catches,
            row,
        })?;
        Ok(())
    }

    pub fn cached(&self, table: Table, key: &str) -> Result<Option<Row>, StorageError> {
        Ok(self.ctx.storage().get_cached(table, key)?.map(|cached| cached.row))
    }

    pub fn queue_len(&self) -> Result<u64, StorageError> {
        self.ctx.storage().queue_len()
    }

    pub fn import_legacy(&mut self, table: Table, rows: &[Row]) -> Result<usize, StorageError> {
        self.ctx.storage_mut().import_legacy_rows(table, rows)
    }
}

pub fn catch_row(id: &str, species: &str, updated_at: i64) -> Row {
    let mut r = row([("id", id), ("species", species)]);
    r.insert("updated_at".into(), FieldValue::Timestamp(updated_at));
    r
}

pub fn project_row(id: &str, name: &str) -> Row {
    row([("id", id), ("name", name)])
}
