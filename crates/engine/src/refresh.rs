use ringsync_core::Table;
use ringsync_storage::{LocalStore, MergeStats, StorageError};
use tracing::{debug, info, warn};

use crate::SyncContext;
use crate::error::EngineError;
use crate::remote::{Filter, RemoteStore};

/// Tables re-pulled when the app returns to the foreground and their cache is stale.
pub const FOREGROUND_REFRESH: [Table; 3] =
    [Table::Species, Table::FieldConfig, Table::SpeciesOverrides];

/// Tables holding the signed-in user's own records.
pub const USER_DATA: [Table; 3] = [Table::Catches, Table::Projects, Table::RingBatches];

pub fn last_pull_key(table: Table) -> String {
    format!("last_pull:{table}")
}

impl<R: RemoteStore> SyncContext<R> {
    /// Pull `table` from the remote store and merge it into the local cache.
    ///
    /// User-owned tables are scoped to the signed-in user. Returns `None` when
    /// another pull is already in flight.
    pub fn refresh_table(&mut self, table: Table) -> Result<Option<MergeStats>, EngineError> {
        if !table.is_cached() {
            return Err(StorageError::NotCached(table).into());
        }
        let filter = if table.is_user_owned() {
            Filter::new().owned_by(self.require_user()?)
        } else {
            Filter::new()
        };

        if !self.state.try_begin_pull() {
            debug!(%table, "pull already in flight");
            return Ok(None);
        }
        let pulled = self.pull_into_cache(table, &filter);
        self.state.end_pull();
        pulled.map(Some)
    }

    fn pull_into_cache(&mut self, table: Table, filter: &Filter) -> Result<MergeStats, EngineError> {
        let rows = self.remote.select(table, filter)?;
        let fetched = rows.len();
        let stats = self.storage.merge_pulled(table, rows)?;
        let now = i64::try_from(self.clock.now_ms()).unwrap_or(i64::MAX);
        self.storage.set_meta(&last_pull_key(table), now)?;
        info!(
            %table,
            fetched,
            taken_remote = stats.taken_remote,
            kept_local = stats.kept_local,
            "cache refreshed"
        );
        Ok(stats)
    }

    /// Best-effort refresh. Failures are logged and otherwise ignored.
    pub(crate) fn refresh_opportunistically(&mut self, table: Table) {
        if let Err(err) = self.refresh_table(table) {
            warn!(%table, error = %err, "cache refresh failed");
        }
    }

    /// True when `table` was never pulled or was last pulled longer ago than the freshness window.
    pub fn is_cache_stale(&self, table: Table) -> Result<bool, EngineError> {
        let Some(last) = self.storage.get_meta(&last_pull_key(table))? else {
            return Ok(true);
        };
        let last = u64::try_from(last).unwrap_or(0);
        Ok(self.clock.now_ms().saturating_sub(last) > self.config.reference_freshness_ms)
    }

    /// Re-pull the species list, field configuration and overrides if their cache has aged out.
    /// Returns the tables a refresh was attempted for.
    pub fn refresh_stale_reference_caches(&mut self) -> Result<Vec<Table>, EngineError> {
        let mut attempted = Vec::new();
        for table in FOREGROUND_REFRESH {
            if table.is_user_owned() && self.user.is_none() {
                continue;
            }
            if self.is_cache_stale(table)? {
                self.refresh_opportunistically(table);
                attempted.push(table);
            }
        }
        Ok(attempted)
    }

    /// Pull the user's catches, projects and ring batches.
    pub fn pull_user_data(&mut self) -> Result<Vec<(Table, MergeStats)>, EngineError> {
        self.require_user()?;
        let mut merged = Vec::with_capacity(USER_DATA.len());
        for table in USER_DATA {
            if let Some(stats) = self.refresh_table(table)? {
                merged.push((table, stats));
            }
        }
        Ok(merged)
    }
}
