use tracing::{debug, info};

use crate::SyncContext;
use crate::error::EngineError;
use crate::reconciler::PassOutcome;
use crate::remote::RemoteStore;

/// What asked for a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Reconnected,
    Foreground,
    Enqueued,
    SignedIn,
    Forced,
}

impl<R: RemoteStore> SyncContext<R> {
    /// Record a connectivity change. An offline to online transition starts a pass.
    pub fn set_online(&mut self, online: bool) -> Result<Option<PassOutcome>, EngineError> {
        if self.state.set_online(online) {
            info!("connectivity restored");
            return self.handle_trigger(Trigger::Reconnected).map(Some);
        }
        if !online {
            debug!("offline");
        }
        Ok(None)
    }

    /// The app moved to the foreground or background.
    ///
    /// Becoming visible while online and signed in refreshes stale reference
    /// caches, then reconciles.
    pub fn on_visibility_change(&mut self, visible: bool) -> Result<Option<PassOutcome>, EngineError> {
        if !visible || !self.state.is_online() || self.user.is_none() {
            return Ok(None);
        }
        self.refresh_stale_reference_caches()?;
        self.handle_trigger(Trigger::Foreground).map(Some)
    }

    /// Reconcile now, regardless of trigger conditions. Still skipped if offline or mid-pass.
    pub fn force_sync(&mut self) -> Result<PassOutcome, EngineError> {
        self.handle_trigger(Trigger::Forced)
    }

    pub(crate) fn handle_trigger(&mut self, trigger: Trigger) -> Result<PassOutcome, EngineError> {
        let outcome = self.reconcile()?;
        if let Some(reason) = outcome.skip_reason() {
            debug!(?trigger, ?reason, "reconcile skipped");
        }
        Ok(outcome)
    }
}
