pub mod clock;
pub mod config;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod merge;
pub mod mutation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use error::CoreError;
pub use field_value::{FieldValue, Row};
pub use ids::*;
pub use mutation::{Mutation, QueueItem, Table};
