//! Shared sync status types.

use serde::Serialize;

/// Coarse sync state for status displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Pending,
}

/// Snapshot of the engine's connectivity and sync activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub connected: bool,
    pub sync_in_flight: bool,
}

impl SyncStatus {
    /// Derive the coarse state given the current queue length
    #[must_use]
    pub const fn state(self, pending_count: usize) -> SyncState {
        if !self.connected {
            SyncState::Offline
        } else if self.sync_in_flight {
            SyncState::Syncing
        } else if pending_count > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }
}
