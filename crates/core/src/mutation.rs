use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::{FieldValue, Row, text_field};
use crate::ids::{QueueItemId, UserId};

/// Column carrying the owning user on user-owned tables.
pub const OWNER_FIELD: &str = "user_id";
pub const UPDATED_AT_FIELD: &str = "updated_at";
pub const DELETED_AT_FIELD: &str = "deleted_at";
pub const UPLOADED_FIELD: &str = "uploaded";

/// Remote tables the sync core knows about. All but `Profiles` are mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Table {
    Catches,
    Projects,
    RingBatches,
    SpeciesOverrides,
    Profiles,
    Species,
    FieldConfig,
}

impl Table {
    pub const CACHED: [Table; 6] = [
        Table::Catches,
        Table::Projects,
        Table::RingBatches,
        Table::SpeciesOverrides,
        Table::Species,
        Table::FieldConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catches => "catches",
            Self::Projects => "projects",
            Self::RingBatches => "ring_batches",
            Self::SpeciesOverrides => "species_overrides",
            Self::Profiles => "profiles",
            Self::Species => "species",
            Self::FieldConfig => "field_config",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "catches" => Ok(Self::Catches),
            "projects" => Ok(Self::Projects),
            "ring_batches" => Ok(Self::RingBatches),
            "species_overrides" => Ok(Self::SpeciesOverrides),
            "profiles" => Ok(Self::Profiles),
            "species" => Ok(Self::Species),
            "field_config" => Ok(Self::FieldConfig),
            _ => Err(CoreError::UnknownTable(s.to_string())),
        }
    }

    /// Column identifying a row within the local mirror of this table.
    pub fn key_field(&self) -> &'static str {
        match self {
            Self::SpeciesOverrides => "species_name",
            Self::FieldConfig => "field_key",
            _ => "id",
        }
    }

    /// Conflict target used for remote upserts.
    pub fn conflict_key(&self) -> &'static [&'static str] {
        match self {
            Self::SpeciesOverrides => &["user_id", "species_name"],
            Self::FieldConfig => &["field_key"],
            _ => &["id"],
        }
    }

    /// Rows of these tables belong to a single user and carry `user_id`.
    pub fn is_user_owned(&self) -> bool {
        matches!(
            self,
            Self::Catches | Self::Projects | Self::RingBatches | Self::SpeciesOverrides
        )
    }

    pub fn is_cached(&self) -> bool {
        !matches!(self, Self::Profiles)
    }

    /// Admin-curated datasets that are only ever pulled, never written by the client.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Species | Self::FieldConfig)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending write, one variant per remote operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Upsert {
        table: Table,
        row: Row,
    },
    Delete {
        table: Table,
        id: String,
    },
    BatchUpsert {
        table: Table,
        rows: Vec<Row>,
    },
    SpeciesOverrideUpsert {
        species_name: String,
        fields: Row,
    },
    SpeciesOverrideDelete {
        species_name: String,
    },
    ProfileUpdate {
        fields: Row,
    },
    MarkUploaded {
        ids: Vec<String>,
    },
    SoftDelete {
        table: Table,
        id: String,
        deleted_at: i64,
    },
    Restore {
        table: Table,
        id: String,
    },
}

impl Mutation {
    pub fn table(&self) -> Table {
        match self {
            Self::Upsert { table, .. }
            | Self::Delete { table, .. }
            | Self::BatchUpsert { table, .. }
            | Self::SoftDelete { table, .. }
            | Self::Restore { table, .. } => *table,
            Self::SpeciesOverrideUpsert { .. } | Self::SpeciesOverrideDelete { .. } => {
                Table::SpeciesOverrides
            }
            Self::ProfileUpdate { .. } => Table::Profiles,
            Self::MarkUploaded { .. } => Table::Catches,
        }
    }

    /// String name of the operation kind for storage and logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
            Self::BatchUpsert { .. } => "batchUpsert",
            Self::SpeciesOverrideUpsert { .. } => "speciesOverrideUpsert",
            Self::SpeciesOverrideDelete { .. } => "speciesOverrideDelete",
            Self::ProfileUpdate { .. } => "profileUpdate",
            Self::MarkUploaded { .. } => "markUploaded",
            Self::SoftDelete { .. } => "softDelete",
            Self::Restore { .. } => "restore",
        }
    }

    /// Reject mutations the remote store could never apply, before they are queued.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Upsert { table, row } => require_key(*table, row),
            Self::BatchUpsert { table, rows } => {
                rows.iter().try_for_each(|row| require_key(*table, row))
            }
            Self::Delete { table, id }
            | Self::SoftDelete { table, id, .. }
            | Self::Restore { table, id } => {
                if table.is_reference() || *table == Table::Profiles {
                    return Err(CoreError::InvalidMutation(format!(
                        "{} is not writable by {}",
                        table,
                        self.kind_name()
                    )));
                }
                if id.is_empty() {
                    return Err(CoreError::InvalidMutation(format!(
                        "{} on {table} without id",
                        self.kind_name()
                    )));
                }
                Ok(())
            }
            Self::SpeciesOverrideUpsert { species_name, .. }
            | Self::SpeciesOverrideDelete { species_name } => {
                if species_name.is_empty() {
                    return Err(CoreError::InvalidMutation(
                        "species override without species name".into(),
                    ));
                }
                Ok(())
            }
            Self::ProfileUpdate { fields } => {
                if fields.is_empty() {
                    return Err(CoreError::InvalidMutation("empty profile update".into()));
                }
                Ok(())
            }
            Self::MarkUploaded { .. } => Ok(()),
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

fn require_key(table: Table, row: &Row) -> Result<(), CoreError> {
    if table == Table::Profiles || table.is_reference() {
        return Err(CoreError::InvalidMutation(format!(
            "{table} rows are not written through the queue"
        )));
    }
    match text_field(row, table.key_field()) {
        Some(key) if !key.is_empty() => Ok(()),
        _ => Err(CoreError::MissingKey {
            table: table.to_string(),
            field: table.key_field().to_string(),
        }),
    }
}

/// Return `row` with `user_id` set, for tables whose rows are owned by a user.
pub fn stamp_owner(table: Table, mut row: Row, owner: &str) -> Row {
    if table.is_user_owned() {
        row.insert(OWNER_FIELD.to_string(), FieldValue::Text(owner.to_string()));
    }
    row
}

/// A mutation waiting in the durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub table: Table,
    pub mutation: Mutation,
    /// The user who queued the mutation. Only their session dispatches it.
    pub owner: UserId,
    /// Milliseconds since the Unix epoch. Informational only.
    pub created_at: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Items at or past the retry ceiling are never dispatched again.
    pub fn is_stuck(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }
}
