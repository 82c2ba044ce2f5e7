use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use ringsync_core::{Row, Table};
use ringsync_engine::{Filter, RemoteError, RemoteStore};

/// One request as the remote store received it.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Upsert {
        table: Table,
        rows: Vec<Row>,
        on_conflict: Vec<String>,
    },
    Update {
        table: Table,
        filter: Filter,
        changes: Row,
    },
    Delete {
        table: Table,
        filter: Filter,
    },
    Select {
        table: Table,
        filter: Filter,
    },
    Count {
        table: Table,
        filter: Filter,
    },
}

impl RemoteCall {
    pub fn table(&self) -> Table {
        match self {
            Self::Upsert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Select { table, .. }
            | Self::Count { table, .. } => *table,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Upsert { .. } | Self::Update { .. } | Self::Delete { .. })
    }
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<Table, Vec<Row>>,
    calls: Vec<RemoteCall>,
    fail_next: VecDeque<RemoteError>,
    failing_tables: BTreeMap<Table, RemoteError>,
    lost_responses: VecDeque<RemoteError>,
    unreachable: bool,
}

impl Inner {
    fn injected_failure(&mut self, table: Table) -> Result<(), RemoteError> {
        if self.unreachable {
            return Err(RemoteError::Network("remote unreachable".into()));
        }
        if let Some(err) = self.fail_next.pop_front() {
            return Err(err);
        }
        match self.failing_tables.get(&table) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Applied writes whose response never reaches the client.
    fn lost_response(&mut self) -> Result<(), RemoteError> {
        match self.lost_responses.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn rows_mut(&mut self, table: Table) -> &mut Vec<Row> {
        self.tables.entry(table).or_default()
    }
}

/// In-process remote store. Clones share the same tables, so several devices
/// can sync against one backend.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert rows directly, bypassing the call log and failure injection.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Row>) {
        self.lock().rows_mut(table).extend(rows);
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn find(&self, table: Table, filter: &Filter) -> Vec<Row> {
        self.rows(table)
            .into_iter()
            .filter(|row| filter.matches(row))
            .collect()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(RemoteCall::is_write).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Fail the next request, whatever it is.
    pub fn fail_next(&self, err: RemoteError) {
        self.lock().fail_next.push_back(err);
    }

    /// Fail every request touching `table` until healed.
    pub fn fail_table(&self, table: Table, err: RemoteError) {
        self.lock().failing_tables.insert(table, err);
    }

    /// Apply the next write but report `err` to the caller.
    pub fn lose_next_response(&self, err: RemoteError) {
        self.lock().lost_responses.push_back(err);
    }

    pub fn heal_table(&self, table: Table) {
        self.lock().failing_tables.remove(&table);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }
}

fn same_key(a: &Row, b: &Row, columns: &[String]) -> bool {
    columns.iter().all(|c| a.get(c).is_some() && a.get(c) == b.get(c))
}

impl RemoteStore for MemoryRemote {
    fn upsert(
        &mut self,
        table: Table,
        rows: Vec<Row>,
        on_conflict: &[&str],
    ) -> Result<(), RemoteError> {
        let on_conflict: Vec<String> = on_conflict.iter().map(|c| c.to_string()).collect();
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Upsert {
            table,
            rows: rows.clone(),
            on_conflict: on_conflict.clone(),
        });
        inner.injected_failure(table)?;

        let stored = inner.rows_mut(table);
        for row in rows {
            match stored.iter_mut().find(|existing| same_key(existing, &row, &on_conflict)) {
                Some(existing) => existing.extend(row),
                None => stored.push(row),
            }
        }
        inner.lost_response()
    }

    fn update(&mut self, table: Table, filter: &Filter, changes: Row) -> Result<u64, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Update {
            table,
            filter: filter.clone(),
            changes: changes.clone(),
        });
        inner.injected_failure(table)?;

        let mut touched = 0;
        for row in inner.rows_mut(table).iter_mut().filter(|r| filter.matches(r)) {
            row.extend(changes.clone());
            touched += 1;
        }
        inner.lost_response()?;
        Ok(touched)
    }

    fn delete(&mut self, table: Table, filter: &Filter) -> Result<u64, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Delete {
            table,
            filter: filter.clone(),
        });
        inner.injected_failure(table)?;

        let stored = inner.rows_mut(table);
        let before = stored.len();
        stored.retain(|row| !filter.matches(row));
        let removed = (before - stored.len()) as u64;
        inner.lost_response()?;
        Ok(removed)
    }

    fn select(&mut self, table: Table, filter: &Filter) -> Result<Vec<Row>, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Select {
            table,
            filter: filter.clone(),
        });
        inner.injected_failure(table)?;
        Ok(inner
            .rows_mut(table)
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    fn count(&mut self, table: Table, filter: &Filter) -> Result<u64, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Count {
            table,
            filter: filter.clone(),
        });
        inner.injected_failure(table)?;
        Ok(inner
            .rows_mut(table)
            .iter()
            .filter(|row| filter.matches(row))
            .count() as u64)
    }
}
