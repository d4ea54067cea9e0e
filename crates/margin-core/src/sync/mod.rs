//! Durable mutation queue drain and its triggers.

mod orchestrator;

use serde::{Deserialize, Serialize};

use crate::models::SyncOperation;

pub use orchestrator::SyncOrchestrator;

/// Coarse sync status for UI indicators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

/// Progress of a running drain, emitted after each successful item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// One item that failed during a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItemError {
    pub item_id: i64,
    pub operation: SyncOperation,
    pub message: String,
    /// The item has no retries left
    pub terminal: bool,
}

/// Outcome counters of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: usize,
    pub errors: Vec<SyncItemError>,
    /// Items in the queue that exhausted their retries, after this pass
    pub terminal_failures: usize,
}

/// Result of asking for a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(SyncReport),
    /// Another drain is in flight; this request was a no-op
    AlreadyRunning,
    /// The orchestrator is shutting down
    Stopped,
}

/// Sync notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Sent when a drain starts and when it ends
    Status {
        syncing: bool,
        error: Option<String>,
    },
    Progress(SyncProgress),
    Complete(SyncReport),
}
