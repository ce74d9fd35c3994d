use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::OwnedSemaphorePermit;

use super::git::GitOperation;
use crate::batch::ChangeType;

/// A filtered change to one watched file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    /// Project-relative path.
    pub path: PathBuf,
    pub kind: ChangeType,
}

/// Why watching is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Requested through `pause`; only an explicit `resume` ends it.
    Manual,
    /// A checkout is in progress; resumes on its own after a delay.
    BranchSwitch,
}

/// Events emitted by the watcher after filtering and debouncing.
#[derive(Debug)]
pub enum WatchEvent {
    /// One debounced batch of changes. The permit counts against the
    /// concurrent-batch cap until the consumer drops it.
    Batch {
        changes: Vec<FileChange>,
        permit: OwnedSemaphorePermit,
    },
    /// Repository metadata changed.
    Git {
        operation: GitOperation,
        path: PathBuf,
    },
    Paused(PauseReason),
    Resumed,
    /// Dispatch was deferred because the system is under load.
    Throttled { load: f64, pending: usize },
    /// The OS watcher reported an error; watching continues.
    Error(String),
}
