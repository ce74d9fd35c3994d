//! The orchestrator: wires watcher, batch engine, dependency tracker, cache
//! store and cleaner into one lifecycle.
//!
//! Watcher batches flow through an mpsc channel into
//! [`WatchManager::process_changes`], which reads each file, queues it on the
//! [`BatchInvalidation`] engine and lets the engine invalidate the impact
//! closure through [`AstCache`]. Failures at any stage are recorded per
//! context in the stats and never stop the pipeline.

pub mod hooks;
pub mod profile;
pub mod state;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::batch::{
    BatchInvalidation, BatchStats, ChangeEvent, ChangeType, QueueOptions, QueueOutcome, lock,
};
use crate::cleaner::{AstCacheCleaner, CleanupReport};
use crate::config::AstCacheConfig;
use crate::error::{AstCacheError, Result};
use crate::hasher::ContentHasher;
use crate::store::{AstCache, DiskStore};
use crate::tracker::{DependencyTracker, SharedTracker, TrackerStats};
use crate::walker::walk_project;
use crate::watcher::{
    FileChange, GitOperation, GitState, LoadAverageMonitor, PathFilter, PauseReason,
    ResourceMonitor, UniversalFileWatcher, WatchEvent, WatcherConfig, WatcherStats,
};

pub use profile::{CacheStrategy, StrategyProfile};
pub use state::WatchState;

/// Contexts errors are recorded under.
pub const ERROR_CONTEXTS: [&str; 5] = [
    "file_change",
    "batch_changes",
    "git_operation",
    "processing",
    "watch",
];

/// Error count and most recent occurrence for one context.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStat {
    pub count: u64,
    /// Seconds since the Unix epoch.
    pub last_at: Option<u64>,
    pub last_message: Option<String>,
}

/// Aggregated statistics of every component.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub state: WatchState,
    pub strategy: CacheStrategy,
    pub branch: String,
    pub commit: Option<String>,
    pub uptime_ms: Option<u64>,
    pub watcher: Option<WatcherStats>,
    pub batch: BatchStats,
    pub dependencies: TrackerStats,
    pub last_cleanup: Option<CleanupReport>,
    pub hasher_memo_entries: usize,
    pub errors: BTreeMap<String, ErrorStat>,
}

/// Owns every component for one watched project.
pub struct WatchManager {
    root: PathBuf,
    config: AstCacheConfig,
    filter: PathFilter,
    strategy: Mutex<CacheStrategy>,
    state: Mutex<WatchState>,
    git: Mutex<GitState>,
    hasher: Arc<ContentHasher>,
    tracker: SharedTracker,
    cache: Arc<AstCache>,
    batch: BatchInvalidation,
    cleaner: Arc<AstCacheCleaner>,
    monitor: Arc<dyn ResourceMonitor>,
    watcher: Mutex<Option<UniversalFileWatcher>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    errors: Mutex<BTreeMap<String, ErrorStat>>,
    last_cleanup: Mutex<Option<CleanupReport>>,
    started_at: Mutex<Option<Instant>>,
    /// Set by a branch switch; the graph is rebuilt when watching resumes.
    rebuild_on_resume: AtomicBool,
}

impl std::fmt::Debug for WatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchManager")
            .field("root", &self.root)
            .field("state", &self.state())
            .field("strategy", &self.strategy())
            .finish_non_exhaustive()
    }
}

impl WatchManager {
    /// Build every component for `root`. Fails only on invalid configuration
    /// or an unusable cache directory.
    pub fn new(root: &Path, config: AstCacheConfig) -> Result<Arc<Self>> {
        Self::with_resource_monitor(root, config, Arc::new(LoadAverageMonitor::default()))
    }

    pub fn with_resource_monitor(
        root: &Path,
        config: AstCacheConfig,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let root = std::fs::canonicalize(root).map_err(|e| AstCacheError::io(root, e))?;

        let cache_root = config.cache_root(&root);
        let store = Arc::new(DiskStore::open(&cache_root)?);
        let filter = PathFilter::new(
            &root,
            &config.supported_languages()?,
            &config.exclude,
            Some(&cache_root),
        );
        let git = GitState::read(&root).unwrap_or_default();
        let hasher = Arc::new(ContentHasher::new());
        let tracker = DependencyTracker::new(&root).into_shared();
        let cache = Arc::new(AstCache::new(
            store.clone(),
            Arc::clone(&hasher),
            &root,
            git.cache_branch(),
        ));
        let strategy = config.strategy;
        let batch = BatchInvalidation::new(
            strategy.resolve(&config).batch,
            Arc::clone(&hasher),
            Arc::clone(&tracker),
            cache.clone(),
        );
        let cleaner = Arc::new(AstCacheCleaner::from_config(store, &config)?);

        Ok(Arc::new(Self {
            root,
            config,
            filter,
            strategy: Mutex::new(strategy),
            state: Mutex::new(WatchState::Stopped),
            git: Mutex::new(git),
            hasher,
            tracker,
            cache,
            batch,
            cleaner,
            monitor,
            watcher: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            errors: Mutex::new(
                ERROR_CONTEXTS
                    .iter()
                    .map(|context| ((*context).to_owned(), ErrorStat::default()))
                    .collect(),
            ),
            last_cleanup: Mutex::new(None),
            started_at: Mutex::new(None),
            rebuild_on_resume: AtomicBool::new(false),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AstCacheConfig {
        &self.config
    }

    pub fn state(&self) -> WatchState {
        *lock(&self.state)
    }

    pub fn strategy(&self) -> CacheStrategy {
        *lock(&self.strategy)
    }

    pub fn git_state(&self) -> GitState {
        lock(&self.git).clone()
    }

    pub fn cache(&self) -> &Arc<AstCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &SharedTracker {
        &self.tracker
    }

    pub fn batch(&self) -> &BatchInvalidation {
        &self.batch
    }

    pub fn hasher(&self) -> &Arc<ContentHasher> {
        &self.hasher
    }

    /// Build the dependency graph, attach the watcher and start scheduled
    /// cleanup. Only allowed while stopped.
    pub async fn initialize(self: &Arc<Self>) -> Result<TrackerStats> {
        self.transition(WatchState::Starting, "initialize")?;
        match self.start_pipeline() {
            Ok(stats) => {
                self.set_state(WatchState::Watching);
                *lock(&self.started_at) = Some(Instant::now());
                tracing::info!(root = %self.root.display(), files = stats.files, "watching started");
                Ok(stats)
            }
            Err(err) => {
                self.handle_error("watch", &err);
                self.teardown();
                self.set_state(WatchState::Error);
                Err(err)
            }
        }
    }

    /// Alias of [`initialize`](Self::initialize).
    pub async fn start_watching(self: &Arc<Self>) -> Result<TrackerStats> {
        self.initialize().await
    }

    /// Detach the watcher, cancel timers and drain queued changes.
    pub async fn stop_watching(&self) -> Result<()> {
        self.transition(WatchState::Stopping, "stop")?;
        self.teardown();
        let report = self.batch.flush_batches().await;
        if report.errors > 0 {
            self.handle_error("processing", &format!("{} errors while draining", report.errors));
        }
        *lock(&self.started_at) = None;
        self.set_state(WatchState::Stopped);
        tracing::info!(root = %self.root.display(), "watching stopped");
        Ok(())
    }

    pub fn pause_watching(&self) -> Result<()> {
        self.transition(WatchState::Paused, "pause")?;
        if let Some(watcher) = self.watcher() {
            watcher.pause();
        }
        Ok(())
    }

    pub fn resume_watching(&self) -> Result<()> {
        self.transition(WatchState::Watching, "resume")?;
        if let Some(watcher) = self.watcher() {
            watcher.resume();
        }
        Ok(())
    }

    /// Switch to another preset without restarting. Explicit config overrides
    /// still apply on top of it.
    pub fn set_strategy(&self, strategy: CacheStrategy) {
        let profile = strategy.resolve(&self.config);
        *lock(&self.strategy) = strategy;
        self.batch.set_settings(profile.batch);
        if let Some(watcher) = self.watcher() {
            let mut config = watcher.config();
            config.debounce = profile.debounce;
            watcher.set_config(config);
        }
        tracing::info!(%strategy, "cache strategy changed");
    }

    /// Run one cleanup pass now and remember its report.
    pub fn cleanup(&self) -> CleanupReport {
        let report = self.cleaner.cleanup();
        if report.errors > 0 {
            self.handle_error("processing", &format!("{} errors during cleanup", report.errors));
        }
        *lock(&self.last_cleanup) = Some(report.clone());
        report
    }

    pub fn get_stats(&self) -> ManagerStats {
        let git = self.git_state();
        ManagerStats {
            state: self.state(),
            strategy: self.strategy(),
            branch: git.cache_branch(),
            commit: git.commit,
            uptime_ms: lock(&self.started_at).map(|t| t.elapsed().as_millis() as u64),
            watcher: self.watcher().map(|w| w.stats()),
            batch: self.batch.get_stats(),
            dependencies: self
                .tracker
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .stats(),
            last_cleanup: lock(&self.last_cleanup).clone(),
            hasher_memo_entries: self.hasher.memo_len(),
            errors: lock(&self.errors).clone(),
        }
    }

    /// Queue a batch of changes, reading the current content of every file
    /// that still exists. Unreadable files are recorded as `file_change`
    /// errors and skipped.
    pub async fn process_changes(&self, changes: Vec<FileChange>) -> Vec<QueueOutcome> {
        let mut outcomes = Vec::with_capacity(changes.len());
        for change in changes {
            let event = match change.kind {
                ChangeType::Delete => ChangeEvent::new(change.path, ChangeType::Delete),
                kind => {
                    let abs = self.root.join(&change.path);
                    match tokio::fs::read_to_string(&abs).await {
                        Ok(content) => ChangeEvent::new(change.path, kind).with_content(content),
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                            ChangeEvent::new(change.path, ChangeType::Delete)
                        }
                        Err(err) => {
                            self.handle_error("file_change", &AstCacheError::io(&abs, err));
                            continue;
                        }
                    }
                }
            };
            let outcome = self.batch.queue_change(event, QueueOptions::default()).await;
            if let QueueOutcome::Processed(report) = &outcome
                && report.errors > 0
            {
                self.handle_error(
                    "batch_changes",
                    &format!("{} errors in batch of {}", report.errors, report.changes.len()),
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Walk the project, rebuild the dependency graph and reseed the known
    /// content hashes.
    pub fn rebuild(&self) -> TrackerStats {
        let files = walk_project(&self.filter);
        let stats = self
            .tracker
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .build_dependency_graph(&files);

        let hashes: Vec<(PathBuf, String)> = files
            .par_iter()
            .filter_map(|rel| {
                self.hasher
                    .hash_file(&self.root.join(rel))
                    .map(|hash| (rel.clone(), hash))
            })
            .collect();
        for (rel, hash) in hashes {
            self.batch.seed_hash(rel, hash);
        }
        stats
    }

    /// Re-read `HEAD` and point cache invalidation at the current branch.
    pub fn refresh_git_state(&self) -> GitState {
        let state = GitState::read(&self.root).unwrap_or_default();
        let previous = std::mem::replace(&mut *lock(&self.git), state.clone());
        if previous.branch != state.branch {
            tracing::info!(
                from = previous.branch.as_deref().unwrap_or("(detached)"),
                to = state.branch.as_deref().unwrap_or("(detached)"),
                "branch changed"
            );
        }
        self.cache.set_branch(state.cache_branch());
        state
    }

    /// Record an error under `context` and log it. Never fails.
    pub fn handle_error(&self, context: &str, err: &dyn std::fmt::Display) {
        let message = err.to_string();
        tracing::warn!(context, error = %message, "pipeline error");
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .ok();
        let mut errors = lock(&self.errors);
        let stat = errors.entry(context.to_owned()).or_default();
        stat.count += 1;
        stat.last_at = now;
        stat.last_message = Some(message);
    }

    fn start_pipeline(self: &Arc<Self>) -> Result<TrackerStats> {
        let cleanup_interval = self.config.cleanup_interval()?;
        self.refresh_git_state();
        let stats = self.rebuild();

        let profile = self.strategy().resolve(&self.config);
        let watcher_config = WatcherConfig {
            debounce: profile.debounce,
            cpu_threshold: self.config.cpu_threshold,
            max_concurrent_batches: self.config.max_concurrent_batches,
            git_integration: self.config.git_integration,
            git_resume_delay: std::time::Duration::from_millis(self.config.git_resume_delay_ms),
            ..WatcherConfig::default()
        };
        let (watcher, rx) =
            UniversalFileWatcher::new(self.filter.clone(), watcher_config, Arc::clone(&self.monitor));
        watcher.start()?;

        let events = tokio::spawn(run_event_loop(Arc::downgrade(self), rx));
        let cleanup = self.cleaner.schedule(cleanup_interval);
        *lock(&self.watcher) = Some(watcher);
        lock(&self.tasks).extend([events, cleanup]);
        Ok(stats)
    }

    /// Stop the watcher and abort background tasks.
    fn teardown(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.stop();
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    async fn handle_watch_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Batch { changes, permit } => {
                tracing::debug!(changes = changes.len(), "processing watcher batch");
                self.process_changes(changes).await;
                drop(permit);
            }
            WatchEvent::Git { operation, path } => self.on_git_operation(operation, &path),
            WatchEvent::Paused(reason) => {
                if reason == PauseReason::BranchSwitch {
                    self.set_state_if(WatchState::Watching, WatchState::Paused);
                }
            }
            WatchEvent::Resumed => {
                self.set_state_if(WatchState::Paused, WatchState::Watching);
                if self.rebuild_on_resume.swap(false, Ordering::AcqRel) {
                    let dropped = self.batch.clear();
                    let stats = self.rebuild();
                    tracing::info!(dropped, files = stats.files, "graph rebuilt after branch switch");
                }
            }
            WatchEvent::Throttled { load, pending } => {
                tracing::debug!(load, pending, "watcher throttled");
            }
            WatchEvent::Error(message) => self.handle_error("watch", &message),
        }
    }

    fn on_git_operation(&self, operation: GitOperation, path: &Path) {
        tracing::debug!(operation = operation.as_str(), path = %path.display(), "git operation");
        match operation {
            GitOperation::BranchSwitch => {
                let before = self.git_state().branch;
                let after = self.refresh_git_state().branch;
                if before != after {
                    self.rebuild_on_resume.store(true, Ordering::Release);
                }
            }
            GitOperation::RefUpdate => {
                self.refresh_git_state();
            }
            GitOperation::Staging | GitOperation::LogUpdate => {}
        }
    }

    fn watcher(&self) -> Option<UniversalFileWatcher> {
        lock(&self.watcher).clone()
    }

    fn transition(&self, next: WatchState, operation: &'static str) -> Result<()> {
        let mut state = lock(&self.state);
        let from = *state;
        *state = from.transition(next, operation)?;
        tracing::debug!(%from, to = %next, "state transition");
        Ok(())
    }

    fn set_state(&self, next: WatchState) {
        *lock(&self.state) = next;
    }

    fn set_state_if(&self, expected: WatchState, next: WatchState) {
        let mut state = lock(&self.state);
        if *state == expected {
            *state = next;
        }
    }
}

async fn run_event_loop(manager: Weak<WatchManager>, mut rx: mpsc::UnboundedReceiver<WatchEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.handle_watch_event(event).await;
    }
}
