use ringsync_core::{Mutation, QueueItem, QueueItemId, Row, Table, UserId};

use crate::error::StorageError;

/// A locally mirrored row with its bookkeeping columns lifted out.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRow {
    pub key: String,
    pub row: Row,
    pub uploaded: bool,
    pub deleted_at: Option<i64>,
}

impl CachedRow {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub taken_remote: usize,
    pub kept_local: usize,
}

/// The per-device durable store: cached collections, the mutation queue and metadata.
pub trait LocalStore {
    /// Apply `mutation` to the cached collections and append it to the queue
    /// in one transaction. `owner` is the user the mutation is sent as.
    fn enqueue(
        &mut self,
        mutation: &Mutation,
        owner: &UserId,
        created_at: u64,
    ) -> Result<QueueItemId, StorageError>;

    fn queue_len(&self) -> Result<u64, StorageError>;

    /// All queued items, oldest first.
    fn list_queue(&self) -> Result<Vec<QueueItem>, StorageError>;

    fn get_queue_item(&self, id: QueueItemId) -> Result<Option<QueueItem>, StorageError>;

    /// Returns false if the item was already gone.
    fn remove_queue_item(&mut self, id: QueueItemId) -> Result<bool, StorageError>;

    /// Bump the attempt counter and store the error. Returns the new attempt count.
    fn record_failure(&mut self, id: QueueItemId, error: &str) -> Result<u32, StorageError>;

    fn reset_attempts(&mut self, id: QueueItemId) -> Result<bool, StorageError>;

    fn get_cached(&self, table: Table, key: &str) -> Result<Option<CachedRow>, StorageError>;

    fn list_cached(&self, table: Table) -> Result<Vec<CachedRow>, StorageError>;

    fn cached_count(&self, table: Table) -> Result<u64, StorageError>;

    /// Merge rows pulled from the remote store using last-writer-wins.
    fn merge_pulled(&mut self, table: Table, rows: Vec<Row>) -> Result<MergeStats, StorageError>;

    fn get_meta(&self, key: &str) -> Result<Option<i64>, StorageError>;

    fn set_meta(&mut self, key: &str, value: i64) -> Result<(), StorageError>;

    /// Returns false if the key was not set.
    fn delete_meta(&mut self, key: &str) -> Result<bool, StorageError>;

    /// The user whose rows the user-owned caches currently hold.
    fn cache_owner(&self) -> Result<Option<UserId>, StorageError>;

    fn set_cache_owner(&mut self, user: &UserId) -> Result<(), StorageError>;

    /// Drop every cached row of `table`. Returns the number removed.
    fn clear_cached(&mut self, table: Table) -> Result<u64, StorageError>;
}

/// Data written by the single-device version of the app, before cloud sync existed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacySnapshot {
    pub catches: Vec<Row>,
    pub projects: Vec<Row>,
    pub ring_batches: Vec<Row>,
    pub species_overrides: Vec<Row>,
    pub settings: Option<Row>,
}

impl LegacySnapshot {
    pub fn is_empty(&self) -> bool {
        self.catches.is_empty()
            && self.projects.is_empty()
            && self.ring_batches.is_empty()
            && self.species_overrides.is_empty()
            && self.settings.as_ref().is_none_or(|s| s.is_empty())
    }

    pub fn record_count(&self) -> usize {
        self.catches.len() + self.projects.len() + self.ring_batches.len() + self.species_overrides.len()
    }
}

pub trait LegacySource {
    fn load_legacy(&self) -> Result<LegacySnapshot, StorageError>;
}

/// Per-user record of a completed legacy migration. Markers are never removed.
pub trait MarkerStore {
    fn is_migrated(&self, user: &UserId) -> Result<bool, StorageError>;

    fn mark_migrated(&mut self, user: &UserId, at: u64) -> Result<(), StorageError>;
}
