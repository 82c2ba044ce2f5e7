use ringsync_core::Table;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("table {0} has no local mirror")]
    NotCached(Table),

    #[error("invalid legacy data: {0}")]
    InvalidLegacy(String),

    #[error("core error: {0}")]
    Core(#[from] ringsync_core::CoreError),
}
