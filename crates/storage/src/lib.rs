pub mod error;
pub mod markers;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use markers::SqliteMarkerStore;
pub use sqlite::SqliteStorage;
pub use traits::*;
