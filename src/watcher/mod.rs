//! Filtered, debounced, resource-aware file watching.
//!
//! The OS watcher (`notify-debouncer-mini`) feeds a blocking bridge task that
//! calls [`UniversalFileWatcher::ingest`] for project files and
//! [`UniversalFileWatcher::handle_git`] for repository metadata. Everything
//! after that point (debounce timer, throttling, the concurrent-batch cap and
//! branch-switch pauses) runs on tokio timers and can be driven directly in
//! tests.

pub mod event;
pub mod filter;
pub mod git;
pub mod resource;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use crate::batch::{ChangeType, lock};
use crate::error::{AstCacheError, Result};

pub use event::{FileChange, PauseReason, WatchEvent};
pub use filter::PathFilter;
pub use git::{GitOperation, GitState};
pub use resource::{FixedLoad, LoadAverageMonitor, ResourceMonitor};

/// Coalescing window of the OS-level debouncer. The watcher's own debounce
/// runs on top of it.
const OS_DEBOUNCE: Duration = Duration::from_millis(50);

/// Runtime tuning for [`UniversalFileWatcher`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherConfig {
    /// Quiet period after the last event before pending changes are dispatched.
    pub debounce: Duration,
    /// Delay before retrying a dispatch deferred by load or the batch cap.
    pub throttle_delay: Duration,
    /// Normalised load above which dispatch is deferred.
    pub cpu_threshold: f64,
    /// Max batches handed out and not yet released. Fixed at construction.
    pub max_concurrent_batches: usize,
    /// Watch repository metadata.
    pub git_integration: bool,
    /// How long a branch switch keeps watching paused.
    pub git_resume_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            throttle_delay: Duration::from_secs(1),
            cpu_threshold: 0.8,
            max_concurrent_batches: 2,
            git_integration: true,
            git_resume_delay: Duration::from_secs(2),
        }
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was pending.
    Empty,
    /// A batch with this many changes was sent.
    Dispatched(usize),
    /// Load was above the threshold; retried later.
    Throttled,
    /// Every batch slot was in use; retried later.
    Deferred,
    /// Watching is paused; pending changes wait for resume.
    Paused,
}

/// Counters exposed through [`UniversalFileWatcher::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatcherStats {
    pub events_received: u64,
    pub events_filtered: u64,
    pub events_while_paused: u64,
    pub batches_dispatched: u64,
    pub changes_dispatched: u64,
    pub throttled: u64,
    pub deferred: u64,
    pub git_events: u64,
    pub errors: u64,
    pub pending: usize,
    pub in_flight_batches: usize,
    pub paused: Option<PauseReason>,
    pub running: bool,
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Project,
    Git,
}

/// OS resources held while started. Dropping it stops the OS watchers, which
/// closes the bridge channel and ends the bridge task.
struct OsWatch {
    project: Debouncer<notify::RecommendedWatcher>,
    _git: Option<Debouncer<notify::RecommendedWatcher>>,
    _bridge: JoinHandle<()>,
    attached: bool,
}

struct Inner {
    filter: PathFilter,
    git_dir: Option<PathBuf>,
    config: Mutex<WatcherConfig>,
    pending: Mutex<BTreeMap<PathBuf, ChangeType>>,
    tx: mpsc::UnboundedSender<WatchEvent>,
    monitor: Arc<dyn ResourceMonitor>,
    batch_slots: Arc<Semaphore>,
    max_batches: usize,
    paused: Mutex<Option<PauseReason>>,
    dispatch_timer: Mutex<Option<JoinHandle<()>>>,
    resume_timer: Mutex<Option<JoinHandle<()>>>,
    os: Mutex<Option<OsWatch>>,
    stats: Mutex<WatcherStats>,
}

/// Watches one project root. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct UniversalFileWatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UniversalFileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniversalFileWatcher")
            .field("root", &self.inner.filter.root())
            .field("paused", &*lock(&self.inner.paused))
            .finish_non_exhaustive()
    }
}

impl UniversalFileWatcher {
    /// Create a watcher and the receiver its events are delivered on. Nothing
    /// is watched until [`start`](Self::start).
    pub fn new(
        filter: PathFilter,
        config: WatcherConfig,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let max_batches = config.max_concurrent_batches.max(1);
        let git_dir = git::git_dir(filter.root());
        let inner = Inner {
            filter,
            git_dir,
            config: Mutex::new(config),
            pending: Mutex::new(BTreeMap::new()),
            tx,
            monitor,
            batch_slots: Arc::new(Semaphore::new(max_batches)),
            max_batches,
            paused: Mutex::new(None),
            dispatch_timer: Mutex::new(None),
            resume_timer: Mutex::new(None),
            os: Mutex::new(None),
            stats: Mutex::new(WatcherStats::default()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn root(&self) -> &Path {
        self.inner.filter.root()
    }

    pub fn filter(&self) -> &PathFilter {
        &self.inner.filter
    }

    pub fn config(&self) -> WatcherConfig {
        lock(&self.inner.config).clone()
    }

    /// Replace the tuning. Takes effect from the next timer; the batch cap
    /// keeps its construction-time value.
    pub fn set_config(&self, config: WatcherConfig) {
        *lock(&self.inner.config) = config;
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.os).is_some()
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        *lock(&self.inner.paused)
    }

    pub fn is_paused(&self) -> bool {
        self.pause_reason().is_some()
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Attach the OS watchers. Must be called inside a tokio runtime.
    /// Starting a started watcher is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut os = lock(&self.inner.os);
        if os.is_some() {
            return Ok(());
        }

        let (std_tx, std_rx) = std::sync::mpsc::channel::<(Source, DebounceEventResult)>();

        let project_tx = std_tx.clone();
        let mut project = new_debouncer(OS_DEBOUNCE, move |res: DebounceEventResult| {
            let _ = project_tx.send((Source::Project, res));
        })?;
        project
            .watcher()
            .watch(self.root(), RecursiveMode::Recursive)?;

        let git = match &self.inner.git_dir {
            Some(git_dir) if self.config().git_integration => {
                Some(watch_git_dir(git_dir, std_tx.clone())?)
            }
            _ => None,
        };
        drop(std_tx);

        let weak = Arc::downgrade(&self.inner);
        let bridge = tokio::task::spawn_blocking(move || bridge_events(std_rx, weak));

        *os = Some(OsWatch {
            project,
            _git: git,
            _bridge: bridge,
            attached: true,
        });
        drop(os);

        if self.is_paused() {
            self.set_attached(false);
        }
        lock(&self.inner.stats).running = true;
        tracing::info!(root = %self.root().display(), "file watcher started");
        Ok(())
    }

    /// Detach the OS watchers, cancel timers and drop pending changes.
    /// Returns how many pending changes were discarded.
    pub fn stop(&self) -> usize {
        let os = lock(&self.inner.os).take();
        if let Some(handle) = lock(&self.inner.dispatch_timer).take() {
            handle.abort();
        }
        if let Some(handle) = lock(&self.inner.resume_timer).take() {
            handle.abort();
        }
        let discarded = std::mem::take(&mut *lock(&self.inner.pending)).len();
        lock(&self.inner.stats).running = false;
        if os.is_some() {
            tracing::info!(root = %self.root().display(), discarded, "file watcher stopped");
        }
        discarded
    }

    /// Record a raw change. Returns false when the path is filtered out or
    /// watching is paused. Restarts the debounce timer.
    pub fn ingest(&self, path: &Path, kind: ChangeType) -> bool {
        lock(&self.inner.stats).events_received += 1;

        let Some(rel) = self.inner.filter.relative(path) else {
            lock(&self.inner.stats).events_filtered += 1;
            return false;
        };
        if !self.inner.filter.accepts(&rel) {
            lock(&self.inner.stats).events_filtered += 1;
            return false;
        }
        if self.is_paused() {
            lock(&self.inner.stats).events_while_paused += 1;
            return false;
        }

        {
            let mut pending = lock(&self.inner.pending);
            let merged = match (pending.get(&rel), kind) {
                (Some(ChangeType::Add), ChangeType::Modify) => ChangeType::Add,
                _ => kind,
            };
            pending.insert(rel, merged);
        }
        let debounce = self.config().debounce;
        self.schedule_dispatch(debounce);
        true
    }

    /// Hand pending changes to the consumer as one batch, unless paused, the
    /// system is under load, or every batch slot is taken. Deferred changes
    /// stay pending and a retry is scheduled.
    pub fn dispatch_pending(&self) -> DispatchOutcome {
        if self.is_paused() {
            return DispatchOutcome::Paused;
        }
        let pending = self.pending();
        if pending == 0 {
            return DispatchOutcome::Empty;
        }

        let config = self.config();
        let load = self.inner.monitor.cpu_load();
        if load > config.cpu_threshold {
            lock(&self.inner.stats).throttled += 1;
            tracing::debug!(load, pending, "dispatch throttled");
            let _ = self.inner.tx.send(WatchEvent::Throttled { load, pending });
            self.schedule_dispatch(config.throttle_delay);
            return DispatchOutcome::Throttled;
        }

        let Ok(permit) = Arc::clone(&self.inner.batch_slots).try_acquire_owned() else {
            let err = AstCacheError::ResourceExhausted {
                reason: format!("{} batches in flight", self.inner.max_batches),
            };
            lock(&self.inner.stats).deferred += 1;
            tracing::debug!(pending, %err, "dispatch deferred");
            self.schedule_dispatch(config.throttle_delay);
            return DispatchOutcome::Deferred;
        };

        let changes: Vec<FileChange> = std::mem::take(&mut *lock(&self.inner.pending))
            .into_iter()
            .map(|(path, kind)| FileChange { path, kind })
            .collect();
        let count = changes.len();
        {
            let mut stats = lock(&self.inner.stats);
            stats.batches_dispatched += 1;
            stats.changes_dispatched += count as u64;
        }
        tracing::debug!(count, "dispatching change batch");
        if self
            .inner
            .tx
            .send(WatchEvent::Batch { changes, permit })
            .is_err()
        {
            tracing::debug!("watch event receiver dropped");
        }
        DispatchOutcome::Dispatched(count)
    }

    /// React to a repository metadata change. A branch switch pauses watching
    /// and arms an automatic resume, unless a manual pause is in effect.
    pub fn handle_git(&self, operation: GitOperation, path: PathBuf) {
        lock(&self.inner.stats).git_events += 1;
        tracing::debug!(operation = operation.as_str(), path = %path.display(), "git operation");
        let _ = self.inner.tx.send(WatchEvent::Git { operation, path });

        if operation != GitOperation::BranchSwitch || !self.config().git_integration {
            return;
        }
        let newly_paused = {
            let mut paused = lock(&self.inner.paused);
            match *paused {
                Some(PauseReason::Manual) => return,
                Some(PauseReason::BranchSwitch) => false,
                None => {
                    *paused = Some(PauseReason::BranchSwitch);
                    true
                }
            }
        };
        if newly_paused {
            self.set_attached(false);
            tracing::info!("branch switch detected, pausing watcher");
            let _ = self
                .inner
                .tx
                .send(WatchEvent::Paused(PauseReason::BranchSwitch));
        }
        self.arm_auto_resume();
    }

    /// Pause watching until [`resume`](Self::resume). Returns false if it was
    /// already paused manually.
    pub fn pause(&self) -> bool {
        let previous = lock(&self.inner.paused).replace(PauseReason::Manual);
        if let Some(handle) = lock(&self.inner.resume_timer).take() {
            handle.abort();
        }
        if previous == Some(PauseReason::Manual) {
            return false;
        }
        if previous.is_none() {
            self.set_attached(false);
        }
        tracing::info!("watcher paused");
        let _ = self.inner.tx.send(WatchEvent::Paused(PauseReason::Manual));
        true
    }

    /// Reattach watching. Returns false if it was not paused.
    pub fn resume(&self) -> bool {
        if let Some(handle) = lock(&self.inner.resume_timer).take() {
            handle.abort();
        }
        self.resume_now()
    }

    pub fn stats(&self) -> WatcherStats {
        let mut stats = lock(&self.inner.stats).clone();
        stats.pending = self.pending();
        stats.in_flight_batches =
            self.inner.max_batches - self.inner.batch_slots.available_permits();
        stats.paused = self.pause_reason();
        stats
    }

    pub(crate) fn report_error(&self, message: String) {
        lock(&self.inner.stats).errors += 1;
        tracing::warn!(error = %message, "file watcher error");
        let _ = self.inner.tx.send(WatchEvent::Error(message));
    }

    fn resume_now(&self) -> bool {
        if lock(&self.inner.paused).take().is_none() {
            return false;
        }
        self.set_attached(true);
        tracing::info!("watcher resumed");
        let _ = self.inner.tx.send(WatchEvent::Resumed);
        if self.pending() > 0 {
            let debounce = self.config().debounce;
            self.schedule_dispatch(debounce);
        }
        true
    }

    fn ingest_git_path(&self, path: &Path) {
        let Some(git_dir) = &self.inner.git_dir else {
            return;
        };
        let Ok(rel) = path.strip_prefix(git_dir) else {
            return;
        };
        if let Some(operation) = GitOperation::classify(rel) {
            self.handle_git(operation, rel.to_path_buf());
        }
    }

    /// Cancel the pending dispatch timer and start a new one.
    fn schedule_dispatch(&self, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                lock(&inner.dispatch_timer).take();
                UniversalFileWatcher { inner }.dispatch_pending();
            }
        });
        if let Some(previous) = lock(&self.inner.dispatch_timer).replace(handle) {
            previous.abort();
        }
    }

    fn arm_auto_resume(&self) {
        let delay = self.config().git_resume_delay;
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                lock(&inner.resume_timer).take();
                let watcher = UniversalFileWatcher { inner };
                if watcher.pause_reason() == Some(PauseReason::BranchSwitch) {
                    watcher.resume_now();
                }
            }
        });
        if let Some(previous) = lock(&self.inner.resume_timer).replace(handle) {
            previous.abort();
        }
    }

    /// Detach or reattach the project watch without tearing down the watcher.
    fn set_attached(&self, attached: bool) {
        let result = {
            let mut guard = lock(&self.inner.os);
            let Some(os) = guard.as_mut() else {
                return;
            };
            if os.attached == attached {
                return;
            }
            let root = self.inner.filter.root();
            let result = if attached {
                os.project.watcher().watch(root, RecursiveMode::Recursive)
            } else {
                os.project.watcher().unwatch(root)
            };
            if result.is_ok() {
                os.attached = attached;
            }
            result
        };
        if let Err(err) = result {
            self.report_error(err.to_string());
        }
    }
}

/// Watch `HEAD`, `index` and `packed-refs` in the git directory plus the
/// `refs/` and `logs/` trees.
fn watch_git_dir(
    git_dir: &Path,
    tx: std::sync::mpsc::Sender<(Source, DebounceEventResult)>,
) -> Result<Debouncer<notify::RecommendedWatcher>> {
    let mut debouncer = new_debouncer(OS_DEBOUNCE, move |res: DebounceEventResult| {
        let _ = tx.send((Source::Git, res));
    })?;
    debouncer
        .watcher()
        .watch(git_dir, RecursiveMode::NonRecursive)?;
    for sub in ["refs", "logs"] {
        let dir = git_dir.join(sub);
        if dir.is_dir() {
            debouncer.watcher().watch(&dir, RecursiveMode::Recursive)?;
        }
    }
    Ok(debouncer)
}

/// Blocking loop forwarding OS events into the watcher. Ends when the OS
/// watchers are dropped or the watcher itself is gone.
fn bridge_events(
    rx: std::sync::mpsc::Receiver<(Source, DebounceEventResult)>,
    weak: Weak<Inner>,
) {
    while let Ok((source, result)) = rx.recv() {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let watcher = UniversalFileWatcher { inner };
        match result {
            Ok(events) => {
                for event in events {
                    match source {
                        Source::Project => {
                            let kind = if event.path.exists() {
                                ChangeType::Modify
                            } else {
                                ChangeType::Delete
                            };
                            watcher.ingest(&event.path, kind);
                        }
                        Source::Git => watcher.ingest_git_path(&event.path),
                    }
                }
            }
            Err(err) => watcher.report_error(err.to_string()),
        }
    }
}
