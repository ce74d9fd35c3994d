//! Cache lifecycle maintenance: age expiry, LRU eviction, orphan removal and
//! empty-directory pruning.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::AstCacheConfig;
use crate::error::Result;
use crate::store::disk::{DiskStore, ENTRY_EXTENSION, StoredEntry};
use crate::store::key::KeyCodec;

/// Eviction stops once usage is at or below this fraction of `max_size`.
const LRU_TARGET_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Completed,
    /// Another pass was running; nothing was done.
    AlreadyInProgress,
}

/// Aggregated result of one cleanup invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub status: CleanupStatus,
    pub expired: usize,
    pub evicted: usize,
    pub orphaned: usize,
    pub directories_removed: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub errors: usize,
    pub duration_ms: u64,
}

impl CleanupReport {
    fn empty(status: CleanupStatus) -> Self {
        Self {
            status,
            expired: 0,
            evicted: 0,
            orphaned: 0,
            directories_removed: 0,
            bytes_before: 0,
            bytes_after: 0,
            errors: 0,
            duration_ms: 0,
        }
    }

    /// Entries removed by any pass.
    pub fn removed(&self) -> usize {
        self.expired + self.evicted + self.orphaned
    }
}

/// Periodic maintenance of a [`DiskStore`].
#[derive(Debug)]
pub struct AstCacheCleaner {
    store: Arc<DiskStore>,
    max_age: Duration,
    max_size: u64,
    running: AtomicBool,
}

/// Clears the running flag when a pass ends, even by panic.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AstCacheCleaner {
    pub fn new(store: Arc<DiskStore>, max_age: Duration, max_size: u64) -> Self {
        Self {
            store,
            max_age,
            max_size,
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(store: Arc<DiskStore>, config: &AstCacheConfig) -> Result<Self> {
        Ok(Self::new(store, config.max_age()?, config.max_size_bytes()?))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run every pass once.
    ///
    /// A call made while another pass is running returns immediately with
    /// [`CleanupStatus::AlreadyInProgress`]. I/O failures on single entries are
    /// counted in `errors` and never abort the pass; entries that vanish
    /// mid-pass are ignored.
    pub fn cleanup(&self) -> CleanupReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("cleanup already in progress");
            return CleanupReport::empty(CleanupStatus::AlreadyInProgress);
        }
        let _guard = RunGuard(&self.running);

        let started = Instant::now();
        let mut report = CleanupReport::empty(CleanupStatus::Completed);

        let entries = match self.store.entries() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(%err, "cannot list cache entries");
                report.errors += 1;
                return report;
            }
        };
        report.bytes_before = entries.iter().map(|e| e.size).sum();

        let now = SystemTime::now();
        let entries = self.expire(entries, now, &mut report);
        let entries = self.remove_orphans(entries, &mut report);
        let entries = self.evict_lru(entries, &mut report);
        report.bytes_after = entries.iter().map(|e| e.size).sum();

        report.directories_removed = prune_empty_dirs(self.store.root(), true, &mut report.errors);
        report.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            expired = report.expired,
            evicted = report.evicted,
            orphaned = report.orphaned,
            directories_removed = report.directories_removed,
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            errors = report.errors,
            "cache cleanup finished"
        );
        report
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` on the tokio runtime.
    ///
    /// The first run happens one interval after scheduling. Failures are
    /// logged; they never stop the timer. Abort the handle to stop.
    pub fn schedule(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cleaner = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let run = Arc::clone(&cleaner);
                match tokio::task::spawn_blocking(move || run.cleanup()).await {
                    Ok(report) if report.errors > 0 => {
                        tracing::warn!(errors = report.errors, "scheduled cleanup had errors");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(%err, "scheduled cleanup failed"),
                }
            }
        })
    }

    fn expire(&self, entries: Vec<StoredEntry>, now: SystemTime, report: &mut CleanupReport) -> Vec<StoredEntry> {
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            let age = now.duration_since(entry.created).unwrap_or_default();
            if age > self.max_age {
                if self.remove(&entry.path, report) {
                    report.expired += 1;
                }
            } else {
                kept.push(entry);
            }
        }
        kept
    }

    /// Entries whose header cannot be read or whose key does not decode are
    /// permanently unaddressable.
    fn remove_orphans(&self, entries: Vec<StoredEntry>, report: &mut CleanupReport) -> Vec<StoredEntry> {
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            // Non-entry files (in-flight temp files) are only subject to expiry.
            let is_entry_file = entry
                .path
                .extension()
                .is_some_and(|ext| ext == ENTRY_EXTENSION);
            let orphan_reason = match &entry.header {
                _ if !is_entry_file => None,
                None => Some("unreadable header".to_owned()),
                Some(header) => KeyCodec::decode(&header.key).err().map(|e| e.to_string()),
            };
            match orphan_reason {
                Some(reason) => {
                    tracing::debug!(path = %entry.path.display(), %reason, "removing orphaned entry");
                    if self.remove(&entry.path, report) {
                        report.orphaned += 1;
                    }
                }
                None => kept.push(entry),
            }
        }
        kept
    }

    /// Evict least-recently-accessed entries until usage is at most 80% of
    /// `max_size`. Nothing happens while usage is within the limit.
    fn evict_lru(&self, mut entries: Vec<StoredEntry>, report: &mut CleanupReport) -> Vec<StoredEntry> {
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= self.max_size {
            return entries;
        }
        let target = (self.max_size as f64 * LRU_TARGET_RATIO) as u64;
        entries.sort_by(|a, b| a.last_access.cmp(&b.last_access).then_with(|| a.path.cmp(&b.path)));

        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            if total > target {
                if self.remove(&entry.path, report) {
                    report.evicted += 1;
                }
                // A vanished entry no longer uses space either.
                total = total.saturating_sub(entry.size);
            } else {
                kept.push(entry);
            }
        }
        kept
    }

    /// Delete one entry. Returns `true` if it was removed by this call.
    fn remove(&self, path: &Path, report: &mut CleanupReport) -> bool {
        match self.store.remove_path(path) {
            Ok(removed) => removed,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot remove cache entry");
                report.errors += 1;
                false
            }
        }
    }
}

/// Remove empty directories below `dir`, children first. `dir` itself is kept
/// when `is_root`. Returns the number of directories removed.
fn prune_empty_dirs(dir: &Path, is_root: bool, errors: &mut usize) -> usize {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(err) => {
            tracing::warn!(path = %dir.display(), %err, "cannot read cache directory");
            *errors += 1;
            return 0;
        }
    };

    let mut removed = 0;
    for entry in read.flatten() {
        if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
            removed += prune_empty_dirs(&entry.path(), false, errors);
        }
    }

    if !is_root {
        let is_empty = std::fs::read_dir(dir).is_ok_and(|mut r| r.next().is_none());
        if is_empty {
            match std::fs::remove_dir(dir) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::debug!(path = %dir.display(), %err, "cannot remove empty directory");
                }
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::LanguageKind;
    use crate::store::CacheStore;
    use crate::store::key::CacheKey;
    use std::path::PathBuf;

    fn key(file: &str) -> String {
        KeyCodec::encode(&CacheKey {
            file_path: PathBuf::from(file),
            project_root: PathBuf::from("/p"),
            branch: "main".to_owned(),
            commit: "c".to_owned(),
            language: LanguageKind::TypeScript,
        })
    }

    fn store() -> (tempfile::TempDir, Arc<DiskStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        (dir, store)
    }

    #[test]
    fn test_nothing_to_do_on_small_fresh_cache() {
        let (_dir, store) = store();
        store.set(&key("a.ts"), b"payload").unwrap();
        let cleaner = AstCacheCleaner::new(store.clone(), Duration::from_secs(3600), 1 << 20);
        let report = cleaner.cleanup();
        assert_eq!(report.status, CleanupStatus::Completed);
        assert_eq!(report.removed(), 0);
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_age_expiry() {
        let (_dir, store) = store();
        store.set(&key("a.ts"), b"payload").unwrap();
        let cleaner = AstCacheCleaner::new(store.clone(), Duration::ZERO, 1 << 20);
        std::thread::sleep(Duration::from_millis(1100));
        let report = cleaner.cleanup();
        assert_eq!(report.expired, 1);
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_orphans_removed() {
        let (dir, store) = store();
        store.set(&key("a.ts"), b"ok").unwrap();
        store.set("garbage-key", b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("ns/aa")).unwrap();
        std::fs::write(dir.path().join("ns/aa/broken.bin"), [0xff, 0xfe]).unwrap();

        let cleaner = AstCacheCleaner::new(store.clone(), Duration::from_secs(3600), 1 << 20);
        let report = cleaner.cleanup();
        assert_eq!(report.orphaned, 2);
        assert_eq!(store.entries().unwrap().len(), 1);
        assert!(report.directories_removed >= 1, "emptied ns/aa should be pruned");
        assert!(dir.path().exists(), "cache root is never pruned");
    }

    #[test]
    fn test_lru_evicts_oldest_access_down_to_80_percent() {
        let (_dir, store) = store();
        let payload = vec![0u8; 1000];
        for name in ["a.ts", "b.ts", "c.ts", "d.ts", "e.ts"] {
            store.set(&key(name), &payload).unwrap();
            std::thread::sleep(Duration::from_millis(15));
        }
        // Touch a.ts so it becomes the most recently used.
        store.get(&key("a.ts")).unwrap();

        let entry_size = store.entries().unwrap()[0].size;
        // Five entries; limit allows a bit more than four, target (80%) a bit more than three.
        let max_size = entry_size * 4 + entry_size / 2;
        let cleaner = AstCacheCleaner::new(store.clone(), Duration::from_secs(3600), max_size);
        let report = cleaner.cleanup();

        assert_eq!(report.evicted, 2, "{report:?}");
        assert!(report.bytes_after <= (max_size as f64 * 0.8) as u64);
        assert!(store.get(&key("a.ts")).unwrap().is_some(), "recently used entry survives");
        assert!(store.get(&key("b.ts")).unwrap().is_none());
        assert!(store.get(&key("c.ts")).unwrap().is_none());
        assert!(store.get(&key("d.ts")).unwrap().is_some());
    }

    #[test]
    fn test_concurrent_call_reports_in_progress() {
        let (_dir, store) = store();
        let cleaner = AstCacheCleaner::new(store, Duration::from_secs(3600), 1 << 20);
        cleaner.running.store(true, Ordering::Release);
        assert_eq!(cleaner.cleanup().status, CleanupStatus::AlreadyInProgress);
        cleaner.running.store(false, Ordering::Release);
        assert_eq!(cleaner.cleanup().status, CleanupStatus::Completed);
        assert!(!cleaner.is_running());
    }

    #[tokio::test]
    async fn test_schedule_runs_periodically() {
        let (_dir, store) = store();
        store.set("garbage-key", b"x").unwrap();
        let cleaner = Arc::new(AstCacheCleaner::new(store.clone(), Duration::from_secs(3600), 1 << 20));
        let handle = cleaner.schedule(Duration::from_millis(50));

        for _ in 0..100 {
            if store.entries().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(store.entries().unwrap().is_empty());
        handle.abort();
    }
}
