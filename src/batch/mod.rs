//! Change batching and dependency-aware invalidation.
//!
//! [`BatchInvalidation`] normalizes incoming [`ChangeEvent`]s, drops
//! duplicates, queues the rest by [`Priority`] and flushes them under the
//! selected [`BatchStrategy`]. A flush applies each surviving change to the
//! dependency graph, expands it into its impact closure and hands the union to
//! an [`InvalidationSink`].

pub mod queue;
pub mod strategy;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::hasher::ContentHasher;
use crate::tracker::SharedTracker;

pub use queue::{BatchQueue, ChangeEvent, ChangeType, CoalescedChange, Priority};
pub use strategy::{BatchSettings, BatchStrategy, FlushTrigger, QueueSnapshot};

/// Receives the files whose cached results must be dropped.
pub trait InvalidationSink: Send + Sync {
    /// Invalidate every cached entry of `files` (project-relative paths).
    /// Returns the number of entries removed.
    fn invalidate(&self, files: &[PathBuf]) -> Result<usize>;
}

/// A sink that only counts, for dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    invalidated: Mutex<Vec<Vec<PathBuf>>>,
}

impl RecordingSink {
    /// Every batch of files passed to `invalidate`, in call order.
    pub fn calls(&self) -> Vec<Vec<PathBuf>> {
        lock(&self.invalidated).clone()
    }
}

impl InvalidationSink for RecordingSink {
    fn invalidate(&self, files: &[PathBuf]) -> Result<usize> {
        lock(&self.invalidated).push(files.to_vec());
        Ok(files.len())
    }
}

/// Options for [`BatchInvalidation::queue_change`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueOptions {
    pub priority: Priority,
    /// Process now, like a critical change.
    pub immediate: bool,
}

/// What happened to a queued change.
#[derive(Debug, Clone)]
pub enum QueueOutcome {
    Queued { id: u64 },
    Deduplicated,
    /// Processed immediately (critical, immediate or flushed on arrival).
    Processed(FlushReport),
}

/// One processed change in a flush.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedChange {
    pub id: u64,
    pub file_path: PathBuf,
    pub change_type: ChangeType,
    /// How many raw changes were folded into this one.
    pub consolidated_changes: usize,
    /// Size of the impact closure of this change.
    pub impacted: usize,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    pub trigger: FlushTrigger,
    pub changes: Vec<ProcessedChange>,
    /// Union of the impact closures, sorted.
    pub invalidated: Vec<PathBuf>,
    /// Cache entries removed by the sink.
    pub entries_removed: usize,
    pub duration_ms: u64,
    pub errors: usize,
}

/// Counters reported by `get_stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub batches_processed: u64,
    pub changes_queued: u64,
    pub changes_deduped: u64,
    pub changes_processed: u64,
    pub files_invalidated: u64,
    pub avg_batch_size: f64,
    pub avg_processing_ms: f64,
    pub strategy_usage: BTreeMap<String, u64>,
    pub errors: u64,
    pub pending: usize,
}

struct Inner {
    settings: Mutex<BatchSettings>,
    queue: Mutex<BatchQueue>,
    stats: Mutex<BatchStats>,
    hasher: Arc<ContentHasher>,
    tracker: SharedTracker,
    sink: Arc<dyn InvalidationSink>,
    /// Held for the whole of a flush; only one runs at a time.
    flush_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
    last_flush: Mutex<Instant>,
    next_id: AtomicU64,
}

/// The batching invalidation engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BatchInvalidation {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BatchInvalidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchInvalidation")
            .field("settings", &*lock(&self.inner.settings))
            .field("pending", &lock(&self.inner.queue).len())
            .finish_non_exhaustive()
    }
}

impl BatchInvalidation {
    pub fn new(
        settings: BatchSettings,
        hasher: Arc<ContentHasher>,
        tracker: SharedTracker,
        sink: Arc<dyn InvalidationSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: Mutex::new(settings),
                queue: Mutex::new(BatchQueue::new()),
                stats: Mutex::new(BatchStats::default()),
                hasher,
                tracker,
                sink,
                flush_lock: tokio::sync::Mutex::new(()),
                timer: Mutex::new(None),
                last_flush: Mutex::new(Instant::now()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> BatchSettings {
        lock(&self.inner.settings).clone()
    }

    /// Replace the batching parameters. Queued changes are kept and evaluated
    /// against the new settings on the next trigger.
    pub fn set_settings(&self, settings: BatchSettings) {
        tracing::info!(strategy = %settings.strategy, "batch settings updated");
        *lock(&self.inner.settings) = settings;
    }

    /// Record the current hash of a file so an unchanged save is deduplicated.
    pub fn seed_hash(&self, path: PathBuf, hash: String) {
        lock(&self.inner.queue).seed_hash(path, hash);
    }

    /// Number of changes waiting in the queue.
    pub fn pending(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Normalize, deduplicate and queue (or immediately process) a change.
    pub async fn queue_change(&self, mut event: ChangeEvent, options: QueueOptions) -> QueueOutcome {
        event.id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        event.priority = options.priority;
        if event.content_hash.is_none()
            && let Some(content) = &event.new_content
        {
            event.content_hash = self.inner.hasher.generate_hash(&event.file_path, content, None);
        }

        let now = Instant::now();
        let settings = self.settings();
        {
            let mut queue = lock(&self.inner.queue);
            if queue.is_duplicate(&event, settings.dedup_window, now) {
                queue.merge_duplicate(&event.file_path);
                queue.record(&event, now);
                drop(queue);
                lock(&self.inner.stats).changes_deduped += 1;
                tracing::debug!(path = %event.file_path.display(), "duplicate change dropped");
                return QueueOutcome::Deduplicated;
            }
            queue.record(&event, now);
        }
        lock(&self.inner.stats).changes_queued += 1;

        let bypass = options.immediate
            || options.priority == Priority::Critical
            || settings.strategy == BatchStrategy::Immediate;
        if bypass {
            let guard = self.inner.flush_lock.lock().await;
            let change = CoalescedChange {
                event,
                consolidated_changes: 1,
            };
            let report = self.process(vec![change], FlushTrigger::Immediate).await;
            drop(guard);
            self.schedule_follow_up();
            return QueueOutcome::Processed(report);
        }

        let id = event.id;
        lock(&self.inner.queue).push(event, now);

        match self.evaluate() {
            Some(trigger) => match self.try_flush(trigger).await {
                Some(report) => QueueOutcome::Processed(report),
                None => QueueOutcome::Queued { id },
            },
            None => {
                self.arm_timer();
                QueueOutcome::Queued { id }
            }
        }
    }

    /// Flush now unless a flush is already running. A concurrent request
    /// returns `None`; the running flush re-evaluates the queue when it ends.
    pub async fn try_flush(&self, trigger: FlushTrigger) -> Option<FlushReport> {
        let Ok(guard) = self.inner.flush_lock.try_lock() else {
            tracing::debug!(?trigger, "flush already in progress");
            self.arm_timer();
            return None;
        };
        let changes = self.take_pending();
        if changes.is_empty() {
            return None;
        }
        let report = self.process(changes, trigger).await;
        drop(guard);
        self.schedule_follow_up();
        Some(report)
    }

    /// Drain the queue, waiting for any in-flight flush to finish first.
    pub async fn flush_batches(&self) -> FlushReport {
        let guard = self.inner.flush_lock.lock().await;
        let changes = self.take_pending();
        let report = self.process(changes, FlushTrigger::Forced).await;
        drop(guard);
        self.schedule_follow_up();
        report
    }

    /// Drop queued changes without processing them. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.cancel_timer();
        let dropped = lock(&self.inner.queue).drain().len();
        if dropped > 0 {
            tracing::info!(dropped, "pending changes discarded");
        }
        dropped
    }

    pub fn get_stats(&self) -> BatchStats {
        let mut stats = lock(&self.inner.stats).clone();
        stats.pending = self.pending();
        stats
    }

    fn evaluate(&self) -> Option<FlushTrigger> {
        let settings = self.settings();
        let since_last_flush = lock(&self.inner.last_flush).elapsed();
        let (queued, oldest_age, paths) = {
            let queue = lock(&self.inner.queue);
            let oldest_age = queue.oldest().map(|t| t.elapsed()).unwrap_or_default();
            let paths = if settings.strategy.uses_scope() {
                queue.pending_paths()
            } else {
                Vec::new()
            };
            (queue.len(), oldest_age, paths)
        };
        let snapshot = QueueSnapshot {
            queued,
            oldest_age,
            since_last_flush,
        };
        settings.evaluate(snapshot, || {
            self.inner
                .tracker
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .impact_preview(&paths)
        })
    }

    fn take_pending(&self) -> Vec<CoalescedChange> {
        self.cancel_timer();
        lock(&self.inner.queue).drain()
    }

    /// Start the fallback flush timer unless one is already pending.
    fn arm_timer(&self) {
        if let Some(delay) = self.settings().timer_delay() {
            self.spawn_timer(delay, None, false);
        }
    }

    /// Re-check the queue after a flush released `flush_lock`.
    ///
    /// Changes that arrived while the flush ran lost their own `try_flush`, so
    /// a trigger that already holds is served right away.
    fn schedule_follow_up(&self) {
        if self.pending() == 0 {
            return;
        }
        match self.evaluate() {
            Some(trigger) => self.spawn_timer(Duration::ZERO, Some(trigger), true),
            None => self.arm_timer(),
        }
    }

    /// Spawn the flush task. `trigger = None` means the strategy's timer
    /// trigger; `replace` aborts a pending timer instead of keeping it.
    fn spawn_timer(&self, delay: Duration, trigger: Option<FlushTrigger>, replace: bool) {
        let mut timer = lock(&self.inner.timer);
        if let Some(pending) = timer.take() {
            if !replace && !pending.is_finished() {
                *timer = Some(pending);
                return;
            }
            pending.abort();
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            let engine = BatchInvalidation { inner };
            let trigger = trigger.unwrap_or_else(|| engine.settings().timer_trigger());
            // Detach first so take_pending does not abort this task.
            lock(&engine.inner.timer).take();
            if engine.try_flush(trigger).await.is_none() && engine.pending() > 0 {
                engine.arm_timer();
            }
        }));
    }

    fn cancel_timer(&self) {
        if let Some(handle) = lock(&self.inner.timer).take() {
            handle.abort();
        }
    }

    /// Apply changes to the graph and invalidate their impact closures.
    ///
    /// Callers hold `flush_lock`. Modified files update their forward edges
    /// before the closure is computed; deleted files compute the closure
    /// first, while their dependents are still linked. Files are handled one
    /// at a time with a yield in between.
    async fn process(&self, changes: Vec<CoalescedChange>, trigger: FlushTrigger) -> FlushReport {
        let started = Instant::now();
        let strategy = self.settings().strategy;
        let mut invalidated: BTreeSet<PathBuf> = BTreeSet::new();
        let mut processed = Vec::with_capacity(changes.len());
        let mut errors = 0usize;

        for change in changes {
            let event = &change.event;
            let impacted = {
                let mut tracker = self
                    .inner
                    .tracker
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                match event.change_type {
                    ChangeType::Delete => {
                        let impacted = tracker.get_impacted_files(std::slice::from_ref(&event.file_path));
                        tracker.remove_file(&event.file_path);
                        impacted
                    }
                    ChangeType::Add | ChangeType::Modify => {
                        tracker.update_file(&event.file_path, event.new_content.as_deref());
                        tracker.get_impacted_files(std::slice::from_ref(&event.file_path))
                    }
                }
            };
            processed.push(ProcessedChange {
                id: event.id,
                file_path: event.file_path.clone(),
                change_type: event.change_type,
                consolidated_changes: change.consolidated_changes,
                impacted: impacted.len(),
            });
            invalidated.extend(impacted);
            tokio::task::yield_now().await;
        }

        if !processed.is_empty() {
            self.inner
                .tracker
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .detect_cycles();
        }

        let invalidated: Vec<PathBuf> = invalidated.into_iter().collect();
        let entries_removed = if invalidated.is_empty() {
            0
        } else {
            match self.inner.sink.invalidate(&invalidated) {
                Ok(removed) => removed,
                Err(err) => {
                    errors += 1;
                    tracing::warn!(%err, files = invalidated.len(), "invalidation failed");
                    0
                }
            }
        };

        let duration = started.elapsed();
        *lock(&self.inner.last_flush) = Instant::now();
        self.record_batch(strategy, processed.len(), duration, errors);

        if !processed.is_empty() {
            tracing::info!(
                ?trigger,
                changes = processed.len(),
                invalidated = invalidated.len(),
                entries_removed,
                elapsed_ms = duration.as_millis() as u64,
                "batch processed"
            );
        }

        FlushReport {
            trigger,
            changes: processed,
            invalidated,
            entries_removed,
            duration_ms: duration.as_millis() as u64,
            errors,
        }
    }

    fn record_batch(&self, strategy: BatchStrategy, size: usize, duration: Duration, errors: usize) {
        if size == 0 {
            return;
        }
        let mut stats = lock(&self.inner.stats);
        stats.batches_processed += 1;
        stats.changes_processed += size as u64;
        stats.errors += errors as u64;
        let n = stats.batches_processed as f64;
        stats.avg_batch_size += (size as f64 - stats.avg_batch_size) / n;
        stats.avg_processing_ms += (duration.as_secs_f64() * 1_000.0 - stats.avg_processing_ms) / n;
        *stats
            .strategy_usage
            .entry(strategy.as_str().to_owned())
            .or_insert(0) += 1;
    }
}

/// Lock a std mutex, recovering the guard if a panicking holder poisoned it.
/// Guarded state is consistent between statements, so the data is still valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::DependencyTracker;
    use std::fs;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: BatchInvalidation,
        sink: Arc<RecordingSink>,
    }

    fn fixture(settings: BatchSettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "import './util';\n").unwrap();
        fs::write(dir.path().join("util.js"), "import './config.json';\n").unwrap();
        fs::write(dir.path().join("config.json"), "{\"a\": 1}").unwrap();
        let mut tracker = DependencyTracker::new(dir.path());
        tracker.build_dependency_graph(&[
            PathBuf::from("main.js"),
            PathBuf::from("util.js"),
            PathBuf::from("config.json"),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let engine = BatchInvalidation::new(
            settings,
            Arc::new(ContentHasher::new()),
            tracker.into_shared(),
            sink.clone(),
        );
        Fixture {
            _dir: dir,
            engine,
            sink,
        }
    }

    fn long_window() -> BatchSettings {
        BatchSettings {
            strategy: BatchStrategy::CountBased,
            max_batch_size: 100,
            max_wait: Duration::from_secs(60),
            ..BatchSettings::default()
        }
    }

    #[tokio::test]
    async fn test_identical_changes_consolidate() {
        let f = fixture(long_window());
        for _ in 0..4 {
            let event = ChangeEvent::new("util.js", ChangeType::Modify).with_content("import './config.json';\n");
            f.engine.queue_change(event, QueueOptions::default()).await;
        }
        assert_eq!(f.engine.pending(), 1);

        let report = f.engine.flush_batches().await;
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].consolidated_changes, 4);
        assert_eq!(
            report.invalidated,
            vec![PathBuf::from("main.js"), PathBuf::from("util.js")]
        );

        let stats = f.engine.get_stats();
        assert_eq!(stats.changes_queued, 1);
        assert_eq!(stats.changes_deduped, 3);
        assert_eq!(stats.batches_processed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_latest_change_per_path_wins() {
        let f = fixture(long_window());
        f.engine
            .queue_change(
                ChangeEvent::new("main.js", ChangeType::Modify).with_content("import './util';\nlet a;"),
                QueueOptions::default(),
            )
            .await;
        f.engine
            .queue_change(
                ChangeEvent::new("main.js", ChangeType::Modify).with_content("import './config.json';\n"),
                QueueOptions {
                    priority: Priority::Low,
                    immediate: false,
                },
            )
            .await;

        let report = f.engine.flush_batches().await;
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].consolidated_changes, 2);

        // The surviving (latest) content re-pointed main.js at config.json.
        let tracker = f.engine.inner.tracker.read().unwrap();
        assert!(tracker.dependents_of(Path::new("util.js")).is_empty());
    }

    #[tokio::test]
    async fn test_seeded_hash_means_no_invalidation() {
        let f = fixture(long_window());
        let hasher = ContentHasher::new();
        let original = "import './config.json';\n";
        let seeded = hasher
            .generate_hash(Path::new("util.js"), original, None)
            .unwrap();
        f.engine.seed_hash(PathBuf::from("util.js"), seeded);

        let outcome = f
            .engine
            .queue_change(
                ChangeEvent::new("util.js", ChangeType::Modify)
                    .with_content("// just a comment\nimport './config.json';\n"),
                QueueOptions::default(),
            )
            .await;
        assert!(matches!(outcome, QueueOutcome::Deduplicated));
        let report = f.engine.flush_batches().await;
        assert!(report.invalidated.is_empty());
        assert!(f.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_critical_bypasses_queue() {
        let f = fixture(long_window());
        let outcome = f
            .engine
            .queue_change(
                ChangeEvent::new("config.json", ChangeType::Modify).with_content("{\"a\": 2}"),
                QueueOptions {
                    priority: Priority::Critical,
                    immediate: false,
                },
            )
            .await;
        let QueueOutcome::Processed(report) = outcome else {
            panic!("critical change should be processed immediately");
        };
        assert_eq!(report.trigger, FlushTrigger::Immediate);
        assert_eq!(report.invalidated.len(), 3);
        assert_eq!(f.engine.pending(), 0);
    }

    #[tokio::test]
    async fn test_count_trigger_flushes_on_arrival() {
        let f = fixture(BatchSettings {
            strategy: BatchStrategy::CountBased,
            max_batch_size: 2,
            max_wait: Duration::from_secs(60),
            ..BatchSettings::default()
        });
        let first = f
            .engine
            .queue_change(
                ChangeEvent::new("main.js", ChangeType::Modify).with_content("import './util';\n// 1"),
                QueueOptions::default(),
            )
            .await;
        assert!(matches!(first, QueueOutcome::Queued { .. }));
        let second = f
            .engine
            .queue_change(
                ChangeEvent::new("config.json", ChangeType::Modify).with_content("{\"a\": 3}"),
                QueueOptions::default(),
            )
            .await;
        let QueueOutcome::Processed(report) = second else {
            panic!("second change should trigger a count flush");
        };
        assert_eq!(report.trigger, FlushTrigger::Count);
        assert_eq!(report.changes.len(), 2);
        assert_eq!(f.engine.get_stats().strategy_usage.get("count_based"), Some(&1));
    }

    #[tokio::test]
    async fn test_delete_invalidates_previous_dependents() {
        let f = fixture(long_window());
        f.engine
            .queue_change(ChangeEvent::new("util.js", ChangeType::Delete), QueueOptions::default())
            .await;
        let report = f.engine.flush_batches().await;
        assert_eq!(
            report.invalidated,
            vec![PathBuf::from("main.js"), PathBuf::from("util.js")]
        );
        let tracker = f.engine.inner.tracker.read().unwrap();
        assert!(!tracker.graph().contains(Path::new("util.js")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_quiet_queue() {
        let f = fixture(BatchSettings {
            strategy: BatchStrategy::TimeBased,
            batch_window: Duration::from_millis(200),
            ..BatchSettings::default()
        });
        f.engine
            .queue_change(
                ChangeEvent::new("config.json", ChangeType::Modify).with_content("{\"a\": 9}"),
                QueueOptions::default(),
            )
            .await;
        assert_eq!(f.engine.pending(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(f.engine.pending(), 0);
        assert_eq!(f.sink.calls().len(), 1);
    }

    /// Sleeps inside `invalidate` to keep a flush in flight.
    #[derive(Default)]
    struct SlowSink {
        inner: RecordingSink,
    }

    impl InvalidationSink for SlowSink {
        fn invalidate(&self, files: &[PathBuf]) -> Result<usize> {
            std::thread::sleep(Duration::from_millis(200));
            self.inner.invalidate(files)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_trigger_during_running_flush_is_served_after_it() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.js"), "import './util';\n").unwrap();
        fs::write(dir.path().join("util.js"), "export const u = 1;\n").unwrap();
        let mut tracker = DependencyTracker::new(dir.path());
        tracker.build_dependency_graph(&[PathBuf::from("main.js"), PathBuf::from("util.js")]);
        let sink = Arc::new(SlowSink::default());
        let engine = BatchInvalidation::new(
            BatchSettings {
                strategy: BatchStrategy::CountBased,
                max_batch_size: 1,
                max_wait: Duration::from_secs(60),
                ..BatchSettings::default()
            },
            Arc::new(ContentHasher::new()),
            tracker.into_shared(),
            sink.clone(),
        );

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .queue_change(
                        ChangeEvent::new("main.js", ChangeType::Modify).with_content("import './util';\n// 1"),
                        QueueOptions::default(),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = engine
            .queue_change(
                ChangeEvent::new("util.js", ChangeType::Modify).with_content("export const u = 2;\n"),
                QueueOptions::default(),
            )
            .await;
        assert!(matches!(second, QueueOutcome::Queued { .. }));
        assert!(matches!(first.await.unwrap(), QueueOutcome::Processed(_)));

        // The count trigger of the second change must not wait for max_wait.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(engine.pending(), 0);
        let calls = sink.inner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1],
            vec![PathBuf::from("main.js"), PathBuf::from("util.js")]
        );
    }

    #[tokio::test]
    async fn test_recreated_file_invalidates_its_old_dependents() {
        let f = fixture(long_window());
        let util = f._dir.path().join("util.js");
        f.engine
            .queue_change(ChangeEvent::new("util.js", ChangeType::Delete), QueueOptions::default())
            .await;
        f.engine.flush_batches().await;

        fs::write(&util, "import './config.json';\n").unwrap();
        f.engine
            .queue_change(ChangeEvent::new("util.js", ChangeType::Add), QueueOptions::default())
            .await;
        let report = f.engine.flush_batches().await;
        assert_eq!(
            report.invalidated,
            vec![PathBuf::from("main.js"), PathBuf::from("util.js")]
        );

        f.engine
            .queue_change(
                ChangeEvent::new("util.js", ChangeType::Modify).with_content("import './config.json';\nexport const v = 2;\n"),
                QueueOptions::default(),
            )
            .await;
        let report = f.engine.flush_batches().await;
        assert!(report.invalidated.contains(&PathBuf::from("main.js")));

        let tracker = f.engine.inner.tracker.read().unwrap();
        assert_eq!(
            tracker.get_impacted_files(&[PathBuf::from("config.json")]),
            vec![
                PathBuf::from("config.json"),
                PathBuf::from("main.js"),
                PathBuf::from("util.js")
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_of_empty_queue_is_empty_report() {
        let f = fixture(long_window());
        let report = f.engine.flush_batches().await;
        assert!(report.changes.is_empty());
        assert!(f.sink.calls().is_empty());
        assert_eq!(f.engine.get_stats().batches_processed, 0);
    }
}
