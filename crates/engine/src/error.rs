use ringsync_core::{CoreError, QueueItemId};
use ringsync_storage::StorageError;
use thiserror::Error;

use crate::migration::MigrationState;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no user signed in")]
    NotAuthenticated,

    #[error("queue item not found: {0}")]
    QueueItemNotFound(QueueItemId),

    #[error("cannot {action} migration while {from:?}")]
    InvalidMigrationTransition {
        from: MigrationState,
        action: &'static str,
    },
}
