//! One-time upload of data written before cloud sync existed.
//!
//! States: `Idle` until a user signs in, then `Checking` resolves to `Done`
//! or `Needed`. From `Needed` the user either starts the upload
//! (`Migrating`, which ends in `Done` or falls back to `Needed` with an
//! error) or dismisses the prompt for the session. A per-user marker is
//! written only on `Done`, so a dismissed prompt returns next session.

use ringsync_core::{Row, Table, UserId, mutation::stamp_owner};
use ringsync_storage::{LegacySnapshot, LegacySource, MarkerStore};
use tracing::{info, warn};

use crate::SyncContext;
use crate::error::EngineError;
use crate::remote::{Filter, RemoteError, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationState {
    #[default]
    Idle,
    Checking,
    Needed,
    Migrating,
    Done,
    Dismissed,
}

/// Counts of what a successful migration uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub catches: usize,
    pub projects: usize,
    pub ring_batches: usize,
    pub species_overrides: usize,
    pub settings: bool,
    pub requests: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationStatus {
    pub state: MigrationState,
    pub last_error: Option<String>,
    pub report: Option<MigrationReport>,
}

impl<R: RemoteStore> SyncContext<R> {
    pub fn migration_status(&self) -> &MigrationStatus {
        &self.migration
    }

    /// Decide whether the signed-in user still has legacy data to upload.
    ///
    /// `Done` when a marker exists, when there is nothing to upload, or when
    /// the remote store already holds rows owned by the user. The last two
    /// also write the marker.
    pub fn check_migration(&mut self) -> Result<MigrationState, EngineError> {
        let user = self.require_user()?.clone();
        self.migration.state = MigrationState::Checking;

        match self.evaluate_migration(&user) {
            Ok(state) => {
                self.migration.state = state;
                info!(%user, ?state, "migration check");
                Ok(state)
            }
            Err(err) => {
                self.migration.state = MigrationState::Needed;
                self.migration.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn evaluate_migration(&mut self, user: &UserId) -> Result<MigrationState, EngineError> {
        if self.markers.is_migrated(user)? {
            return Ok(MigrationState::Done);
        }

        if self.storage.load_legacy()?.is_empty() {
            self.markers.mark_migrated(user, self.clock.now_ms())?;
            return Ok(MigrationState::Done);
        }

        if self.state.is_online() {
            match self.remote_has_user_rows(user) {
                Ok(true) => {
                    self.markers.mark_migrated(user, self.clock.now_ms())?;
                    return Ok(MigrationState::Done);
                }
                Ok(false) => {}
                // Upserts are keyed, so prompting after an inconclusive check is safe.
                Err(err) => {
                    warn!(%user, error = %err, "remote ownership check failed");
                    self.migration.last_error = Some(err.to_string());
                }
            }
        }

        Ok(MigrationState::Needed)
    }

    fn remote_has_user_rows(&mut self, user: &UserId) -> Result<bool, RemoteError> {
        let filter = Filter::new().owned_by(user);
        for table in [Table::Catches, Table::Projects, Table::RingBatches] {
            if self.remote.count(table, &filter)? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Upload all legacy data for the signed-in user.
    ///
    /// Failures are recorded on the status and leave the state at `Needed` so
    /// the user can retry. Starting an already finished migration does nothing.
    pub fn start_migration(&mut self) -> Result<&MigrationStatus, EngineError> {
        let user = self.require_user()?.clone();
        match self.migration.state {
            MigrationState::Needed => {}
            MigrationState::Done => return Ok(&self.migration),
            from => {
                return Err(EngineError::InvalidMigrationTransition {
                    from,
                    action: "start",
                });
            }
        }

        if !self.state.is_online() {
            self.migration.last_error = Some("cannot migrate while offline".into());
            return Ok(&self.migration);
        }

        self.migration.state = MigrationState::Migrating;
        self.migration.last_error = None;

        match self.run_migration(&user) {
            Ok(report) => {
                info!(
                    %user,
                    catches = report.catches,
                    projects = report.projects,
                    ring_batches = report.ring_batches,
                    species_overrides = report.species_overrides,
                    requests = report.requests,
                    "legacy data migrated"
                );
                self.migration.state = MigrationState::Done;
                self.migration.report = Some(report);
            }
            Err(err) => {
                warn!(%user, error = %err, "migration failed");
                self.migration.state = MigrationState::Needed;
                self.migration.last_error = Some(err.to_string());
            }
        }
        Ok(&self.migration)
    }

    fn run_migration(&mut self, user: &UserId) -> Result<MigrationReport, EngineError> {
        let snapshot = self.storage.load_legacy()?;
        let report = upload_snapshot(
            &mut self.remote,
            self.config.migration_batch_size,
            user,
            &snapshot,
        )?;
        self.markers.mark_migrated(user, self.clock.now_ms())?;
        Ok(report)
    }

    /// Hide the prompt for this session. No marker is written.
    pub fn dismiss_migration(&mut self) -> Result<MigrationState, EngineError> {
        match self.migration.state {
            MigrationState::Needed | MigrationState::Dismissed => {
                self.migration.state = MigrationState::Dismissed;
                Ok(MigrationState::Dismissed)
            }
            from => Err(EngineError::InvalidMigrationTransition {
                from,
                action: "dismiss",
            }),
        }
    }
}

fn upload_snapshot<R: RemoteStore>(
    remote: &mut R,
    batch_size: usize,
    user: &UserId,
    snapshot: &LegacySnapshot,
) -> Result<MigrationReport, RemoteError> {
    let mut report = MigrationReport::default();

    for chunk in snapshot.catches.chunks(batch_size.max(1)) {
        report.requests += upload(remote, Table::Catches, user, chunk)?;
        report.catches += chunk.len();
    }
    report.requests += upload(remote, Table::Projects, user, &snapshot.projects)?;
    report.projects = snapshot.projects.len();
    report.requests += upload(remote, Table::RingBatches, user, &snapshot.ring_batches)?;
    report.ring_batches = snapshot.ring_batches.len();
    report.requests += upload(remote, Table::SpeciesOverrides, user, &snapshot.species_overrides)?;
    report.species_overrides = snapshot.species_overrides.len();

    if let Some(settings) = snapshot.settings.as_ref().filter(|s| !s.is_empty()) {
        let mut profile = settings.clone();
        profile.insert("id".into(), user.as_str().into());
        remote.upsert(Table::Profiles, vec![profile], Table::Profiles.conflict_key())?;
        report.settings = true;
        report.requests += 1;
    }

    Ok(report)
}

/// Upsert `rows` in one request, stamped with the owner. Returns the number of requests made.
fn upload<R: RemoteStore>(
    remote: &mut R,
    table: Table,
    user: &UserId,
    rows: &[Row],
) -> Result<usize, RemoteError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let stamped = rows
        .iter()
        .map(|row| stamp_owner(table, row.clone(), user.as_str()))
        .collect();
    remote.upsert(table, stamped, table.conflict_key())?;
    Ok(1)
}
