pub mod error;
pub mod logging;
pub mod migration;
pub mod monitor;
pub mod reconciler;
pub mod refresh;
pub mod remote;
pub mod state;

pub use error::EngineError;
pub use migration::{MigrationReport, MigrationState, MigrationStatus};
pub use monitor::Trigger;
pub use reconciler::{PassOutcome, PassReport, SkipReason};
pub use remote::{Condition, Filter, RemoteError, RemoteStore};
pub use state::{SyncState, SyncStatus};

use ringsync_core::{
    Clock, Mutation, QueueItem, QueueItemId, SyncConfig, SystemClock, Table, UserId,
};
use ringsync_storage::{LocalStore, SqliteMarkerStore, SqliteStorage};
use tracing::{debug, info};

/// Everything one device needs to keep its local data and the remote store in step.
///
/// Owns the local store, the migration markers, the remote client and the
/// in-memory sync state. All entry points take `&mut self`, so at most one
/// reconciliation pass runs per context.
pub struct SyncContext<R: RemoteStore> {
    config: SyncConfig,
    clock: Box<dyn Clock>,
    storage: SqliteStorage,
    markers: SqliteMarkerStore,
    remote: R,
    user: Option<UserId>,
    state: SyncState,
    migration: MigrationStatus,
}

impl<R: RemoteStore> SyncContext<R> {
    /// Starts signed out and offline.
    pub fn new(
        config: SyncConfig,
        storage: SqliteStorage,
        markers: SqliteMarkerStore,
        remote: R,
        clock: Box<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let mut ctx = Self {
            config,
            clock,
            storage,
            markers,
            remote,
            user: None,
            state: SyncState::new(),
            migration: MigrationStatus::default(),
        };
        ctx.refresh_pending_count()?;
        Ok(ctx)
    }

    /// Open (or create) the on-disk stores under `config.data_dir`.
    pub fn open_device(config: SyncConfig, remote: R) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let storage = SqliteStorage::open(config.database_path())?;
        let markers = SqliteMarkerStore::open(config.markers_path())?;
        info!(data_dir = %config.data_dir.display(), "device stores opened");
        Self::new(config, storage, markers, remote, Box::new(SystemClock))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    pub fn markers(&self) -> &SqliteMarkerStore {
        &self.markers
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SyncState {
        &mut self.state
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub(crate) fn require_user(&self) -> Result<&UserId, EngineError> {
        self.user.as_ref().ok_or(EngineError::NotAuthenticated)
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Sign `user` in, evaluate the legacy migration and reconcile if online.
    ///
    /// When the user-owned caches hold another user's rows they are emptied
    /// first, together with their pull timestamps.
    pub fn sign_in(&mut self, user: UserId) -> Result<MigrationState, EngineError> {
        info!(%user, "signed in");
        self.claim_caches(&user)?;
        self.user = Some(user);
        self.migration = MigrationStatus::default();
        let state = self.check_migration()?;
        if self.state.is_online() {
            self.handle_trigger(Trigger::SignedIn)?;
        }
        Ok(state)
    }

    /// Queued items stay on the device and are sent once the user who queued
    /// them signs in again.
    pub fn sign_out(&mut self) {
        if let Some(user) = self.user.take() {
            info!(%user, "signed out");
        }
        self.migration = MigrationStatus::default();
    }

    fn claim_caches(&mut self, user: &UserId) -> Result<(), EngineError> {
        match self.storage.cache_owner()? {
            Some(owner) if owner == *user => return Ok(()),
            Some(previous) => {
                let mut removed = 0;
                for table in Table::CACHED.into_iter().filter(Table::is_user_owned) {
                    removed += self.storage.clear_cached(table)?;
                    self.storage.delete_meta(&refresh::last_pull_key(table))?;
                }
                info!(%previous, %user, removed, "user caches reset for new user");
            }
            None => {}
        }
        self.storage.set_cache_owner(user)?;
        Ok(())
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Apply `mutation` locally and queue it for the remote store as the
    /// signed-in user.
    ///
    /// The local write and the queue append commit together. Reconciles
    /// right away when online and no pass is running.
    pub fn enqueue_mutation(&mut self, mutation: Mutation) -> Result<QueueItemId, EngineError> {
        let owner = self.require_user()?.clone();
        let id = self.storage.enqueue(&mutation, &owner, self.clock.now_ms())?;
        self.refresh_pending_count()?;
        debug!(item = %id, kind = mutation.kind_name(), table = %mutation.table(), "enqueued");

        if self.state.is_online() && !self.state.is_syncing() {
            self.handle_trigger(Trigger::Enqueued)?;
        }
        Ok(id)
    }

    /// Number of queued items, stuck ones included.
    pub fn pending_count(&self) -> Result<u64, EngineError> {
        Ok(self.storage.queue_len()?)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.state.status()
    }

    /// Items that reached the retry ceiling and are no longer dispatched.
    pub fn stuck_items(&self) -> Result<Vec<QueueItem>, EngineError> {
        let max_attempts = self.config.max_attempts;
        Ok(self
            .storage
            .list_queue()?
            .into_iter()
            .filter(|item| item.is_stuck(max_attempts))
            .collect())
    }

    /// Reset the attempt counter of every stuck item so the next pass retries them.
    pub fn retry_stuck_items(&mut self) -> Result<usize, EngineError> {
        let stuck = self.stuck_items()?;
        for item in &stuck {
            self.storage.reset_attempts(item.id)?;
        }
        if !stuck.is_empty() {
            info!(count = stuck.len(), "stuck items re-armed");
        }
        Ok(stuck.len())
    }

    /// Drop one queued item without sending it. The local cache keeps the change.
    pub fn discard_queue_item(&mut self, id: QueueItemId) -> Result<(), EngineError> {
        if !self.storage.remove_queue_item(id)? {
            return Err(EngineError::QueueItemNotFound(id));
        }
        self.refresh_pending_count()?;
        info!(item = %id, "queue item discarded");
        Ok(())
    }

    pub(crate) fn refresh_pending_count(&mut self) -> Result<u64, EngineError> {
        let count = self.storage.queue_len()?;
        self.state.set_pending_count(count);
        Ok(count)
    }
}
