//! Contract of the relational backend the sync core writes to.
//!
//! Every call is expected to be idempotent for the arguments the reconciler
//! passes: upserts are keyed, deletes and updates are scoped by key and owner.

use ringsync_core::{FieldValue, Row, Table, UserId, mutation::OWNER_FIELD};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500 || *status == 429,
            Self::Rejected(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq(String, FieldValue),
    In(String, Vec<FieldValue>),
}

impl Condition {
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq(field, value) => row.get(field) == Some(value),
            Self::In(field, values) => row.get(field).is_some_and(|v| values.contains(v)),
        }
    }
}

/// Conjunction of column conditions. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.conditions
            .push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn is_in<V: Into<FieldValue>>(
        mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn owned_by(self, user: &UserId) -> Self {
        self.eq(OWNER_FIELD, user.as_str())
    }

    /// Key filter for one row of `table`, scoped to `user` when the table is user-owned.
    pub fn row_key(table: Table, key: &str, user: &UserId) -> Self {
        let filter = Self::new().eq(table.key_field(), key);
        if table.is_user_owned() {
            filter.owned_by(user)
        } else {
            filter
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

pub trait RemoteStore {
    /// Insert or update rows, resolving conflicts on the `on_conflict` columns.
    fn upsert(&mut self, table: Table, rows: Vec<Row>, on_conflict: &[&str])
        -> Result<(), RemoteError>;

    /// Set `changes` on every row matching `filter`. Returns the number of rows touched.
    fn update(&mut self, table: Table, filter: &Filter, changes: Row) -> Result<u64, RemoteError>;

    fn delete(&mut self, table: Table, filter: &Filter) -> Result<u64, RemoteError>;

    fn select(&mut self, table: Table, filter: &Filter) -> Result<Vec<Row>, RemoteError>;

    fn count(&mut self, table: Table, filter: &Filter) -> Result<u64, RemoteError>;
}
