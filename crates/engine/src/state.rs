/// In-memory sync status, owned by the `SyncContext`. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pending_count: u64,
    syncing: bool,
    pulling: bool,
    is_online: bool,
    last_synced: Option<u64>,
    last_error: Option<String>,
}

/// What the UI status indicator reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub syncing: bool,
    pub is_online: bool,
    pub pending_count: u64,
    pub last_synced: Option<u64>,
    pub last_error: Option<String>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-flight guard for reconciliation passes. Returns false if a pass is in flight.
    pub fn try_begin_pass(&mut self) -> bool {
        if self.syncing {
            return false;
        }
        self.syncing = true;
        true
    }

    pub fn end_pass(&mut self) {
        self.syncing = false;
    }

    pub fn try_begin_pull(&mut self) -> bool {
        if self.pulling {
            return false;
        }
        self.pulling = true;
        true
    }

    pub fn end_pull(&mut self) {
        self.pulling = false;
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    /// Returns true on an offline to online transition.
    pub fn set_online(&mut self, online: bool) -> bool {
        let came_online = online && !self.is_online;
        self.is_online = online;
        came_online
    }

    pub fn pending_count(&self) -> u64 {
        self.pending_count
    }

    pub(crate) fn set_pending_count(&mut self, count: u64) {
        self.pending_count = count;
    }

    pub(crate) fn record_synced(&mut self, at: u64) {
        self.last_synced = Some(at);
        self.last_error = None;
    }

    pub(crate) fn record_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            syncing: self.syncing,
            is_online: self.is_online,
            pending_count: self.pending_count,
            last_synced: self.last_synced,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_pass_is_refused_until_the_first_ends() {
        let mut state = SyncState::new();
        assert!(state.try_begin_pass());
        assert!(!state.try_begin_pass());
        state.end_pass();
        assert!(state.try_begin_pass());
    }

    #[test]
    fn only_offline_to_online_counts_as_reconnect() {
        let mut state = SyncState::new();
        assert!(state.set_online(true));
        assert!(!state.set_online(true));
        assert!(!state.set_online(false));
        assert!(state.set_online(true));
    }

    #[test]
    fn success_clears_previous_error() {
        let mut state = SyncState::new();
        state.record_error("partial sync".into());
        assert_eq!(state.status().last_error.as_deref(), Some("partial sync"));
        state.record_synced(42);
        let status = state.status();
        assert_eq!(status.last_synced, Some(42));
        assert!(status.last_error.is_none());
    }
}
