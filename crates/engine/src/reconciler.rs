use ringsync_core::{
    FieldValue, Mutation, PassId, QueueItem, Row, Table, UserId,
    mutation::{DELETED_AT_FIELD, OWNER_FIELD, UPLOADED_FIELD, stamp_owner},
};
use ringsync_storage::LocalStore;
use tracing::{debug, info, info_span, warn};

use crate::SyncContext;
use crate::error::EngineError;
use crate::remote::{Filter, RemoteError, RemoteStore};

/// Why a reconciliation request did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAuthenticated,
    AlreadySyncing,
    Offline,
    QueueEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pass_id: PassId,
    /// Items confirmed by the remote store and removed from the queue.
    pub applied: usize,
    /// Items that failed during this pass and remain queued.
    pub failed: usize,
    /// Items skipped because they had reached the retry ceiling.
    pub stuck: usize,
    /// Items queued by another user, left for that user's next session.
    pub deferred: usize,
    /// Queue length after the pass.
    pub pending: u64,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Skipped(SkipReason),
    Completed(PassReport),
}

impl PassOutcome {
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped(reason) => Some(*reason),
            Self::Completed(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    applied: usize,
    failed: usize,
    stuck: usize,
    deferred: usize,
}

impl<R: RemoteStore> SyncContext<R> {
    /// Drain the mutation queue against the remote store, oldest item first.
    ///
    /// A failing item never blocks the items behind it: its attempt counter is
    /// bumped and the pass moves on. Items at the retry ceiling, and items
    /// queued by a different user, are left in the queue untouched. Each item
    /// is sent as the user who queued it. Remote failures are absorbed into the pass report;
    /// only local store failures are returned as errors.
    pub fn reconcile(&mut self) -> Result<PassOutcome, EngineError> {
        let Some(user) = self.user.clone() else {
            return Ok(PassOutcome::Skipped(SkipReason::NotAuthenticated));
        };
        if self.state.is_syncing() {
            return Ok(PassOutcome::Skipped(SkipReason::AlreadySyncing));
        }
        if !self.state.is_online() {
            return Ok(PassOutcome::Skipped(SkipReason::Offline));
        }

        let queue = self.storage.list_queue()?;

        if self.storage.cached_count(Table::Species)? == 0 {
            self.refresh_opportunistically(Table::Species);
        }

        if queue.is_empty() {
            self.refresh_pending_count()?;
            return Ok(PassOutcome::Skipped(SkipReason::QueueEmpty));
        }

        if !self.state.try_begin_pass() {
            return Ok(PassOutcome::Skipped(SkipReason::AlreadySyncing));
        }
        let pass_id = PassId::new();
        let span = info_span!("sync_pass", pass = %pass_id, user = %user);
        let _guard = span.enter();

        debug!(items = queue.len(), "starting sync pass");
        let drained = self.drain(&user, queue);
        self.state.end_pass();
        let tally = drained?;

        let pending = self.refresh_pending_count()?;
        let report = PassReport {
            pass_id,
            applied: tally.applied,
            failed: tally.failed,
            stuck: tally.stuck,
            deferred: tally.deferred,
            pending,
        };

        if report.is_clean() {
            self.state.record_synced(self.clock.now_ms());
            info!(
                applied = report.applied,
                stuck = report.stuck,
                deferred = report.deferred,
                pending,
                "sync pass complete"
            );
            self.refresh_opportunistically(Table::SpeciesOverrides);
        } else {
            let attempted = report.applied + report.failed;
            warn!(failed = report.failed, attempted, pending, "partial sync");
            self.state.record_error(format!(
                "partial sync: {} of {attempted} item(s) failed",
                report.failed
            ));
        }

        Ok(PassOutcome::Completed(report))
    }

    fn drain(&mut self, user: &UserId, queue: Vec<QueueItem>) -> Result<Tally, EngineError> {
        let mut tally = Tally::default();
        let max_attempts = self.config.max_attempts;
        let batch_size = self.config.batch_size;

        for item in queue {
            if item.owner != *user {
                debug!(item = %item.id, owner = %item.owner, "deferred to its owner's session");
                tally.deferred += 1;
                continue;
            }
            if item.is_stuck(max_attempts) {
                debug!(item = %item.id, attempts = item.attempts, "skipping stuck item");
                tally.stuck += 1;
                continue;
            }

            match dispatch(&mut self.remote, batch_size, &item.owner, &item.mutation) {
                Ok(()) => {
                    self.storage.remove_queue_item(item.id)?;
                    debug!(
                        item = %item.id,
                        kind = item.mutation.kind_name(),
                        table = %item.table,
                        "applied"
                    );
                    tally.applied += 1;
                }
                Err(err) => {
                    let attempts = self.storage.record_failure(item.id, &err.to_string())?;
                    tally.failed += 1;
                    if attempts >= max_attempts {
                        warn!(item = %item.id, attempts, error = %err, "retry ceiling reached");
                    } else {
                        debug!(
                            item = %item.id,
                            attempts,
                            error = %err,
                            transient = err.is_transient(),
                            "dispatch failed"
                        );
                    }
                }
            }
        }

        Ok(tally)
    }
}

/// Translate one queued mutation into remote store calls made as `user`.
pub(crate) fn dispatch<R: RemoteStore>(
    remote: &mut R,
    batch_size: usize,
    user: &UserId,
    mutation: &Mutation,
) -> Result<(), RemoteError> {
    let owner = user.as_str();
    match mutation {
        Mutation::Upsert { table, row } => remote.upsert(
            *table,
            vec![stamp_owner(*table, row.clone(), owner)],
            table.conflict_key(),
        ),
        Mutation::BatchUpsert { table, rows } => {
            for chunk in rows.chunks(batch_size.max(1)) {
                let stamped = chunk
                    .iter()
                    .map(|row| stamp_owner(*table, row.clone(), owner))
                    .collect();
                remote.upsert(*table, stamped, table.conflict_key())?;
            }
            Ok(())
        }
        Mutation::Delete { table, id } => {
            remote.delete(*table, &Filter::row_key(*table, id, user))?;
            Ok(())
        }
        Mutation::SpeciesOverrideUpsert {
            species_name,
            fields,
        } => {
            let mut row = fields.clone();
            row.insert("species_name".into(), species_name.as_str().into());
            row.insert(OWNER_FIELD.into(), owner.into());
            remote.upsert(
                Table::SpeciesOverrides,
                vec![row],
                Table::SpeciesOverrides.conflict_key(),
            )
        }
        Mutation::SpeciesOverrideDelete { species_name } => {
            let filter = Filter::row_key(Table::SpeciesOverrides, species_name, user);
            remote.delete(Table::SpeciesOverrides, &filter)?;
            Ok(())
        }
        Mutation::ProfileUpdate { fields } => {
            remote.update(Table::Profiles, &Filter::new().eq("id", owner), fields.clone())?;
            Ok(())
        }
        Mutation::MarkUploaded { ids } => {
            if ids.is_empty() {
                return Ok(());
            }
            let filter = Filter::new()
                .is_in("id", ids.iter().map(String::as_str))
                .owned_by(user);
            remote.update(Table::Catches, &filter, single(UPLOADED_FIELD, true.into()))?;
            Ok(())
        }
        Mutation::SoftDelete {
            table,
            id,
            deleted_at,
        } => {
            let changes = single(DELETED_AT_FIELD, FieldValue::Timestamp(*deleted_at));
            remote.update(*table, &Filter::row_key(*table, id, user), changes)?;
            Ok(())
        }
        Mutation::Restore { table, id } => {
            let changes = single(DELETED_AT_FIELD, FieldValue::Null);
            remote.update(*table, &Filter::row_key(*table, id, user), changes)?;
            Ok(())
        }
    }
}

fn single(field: &str, value: FieldValue) -> Row {
    Row::from([(field.to_string(), value)])
}
