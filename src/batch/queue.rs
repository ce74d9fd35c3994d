use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// Processing priority of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Bypasses the queue and is invalidated immediately.
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

    fn lane(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
}

/// A normalized file change.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    /// Assigned by the batch engine when the change is queued.
    pub id: u64,
    /// Project-relative path.
    pub file_path: PathBuf,
    pub change_type: ChangeType,
    #[serde(skip)]
    pub old_content: Option<String>,
    #[serde(skip)]
    pub new_content: Option<String>,
    pub content_hash: Option<String>,
    pub timestamp: SystemTime,
    pub priority: Priority,
}

impl ChangeEvent {
    pub fn new(file_path: impl Into<PathBuf>, change_type: ChangeType) -> Self {
        Self {
            id: 0,
            file_path: file_path.into(),
            change_type,
            old_content: None,
            new_content: None,
            content_hash: None,
            timestamp: SystemTime::now(),
            priority: Priority::default(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.new_content = Some(content.into());
        self
    }

    pub fn with_old_content(mut self, content: impl Into<String>) -> Self {
        self.old_content = Some(content.into());
        self
    }
}

/// A queued change plus the number of duplicates folded into it.
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub event: ChangeEvent,
    pub duplicates: usize,
}

/// The change that survives coalescing for one path.
#[derive(Debug, Clone)]
pub struct CoalescedChange {
    pub event: ChangeEvent,
    /// Every change seen for the path in this batch, including dropped duplicates.
    pub consolidated_changes: usize,
}

#[derive(Debug, Clone)]
struct LastChange {
    hash: Option<String>,
    change_type: ChangeType,
    at: Instant,
}

/// Priority-partitioned pending changes plus the per-path dedup index.
///
/// The lanes are cleared on every drain; the dedup index survives flushes so
/// content that returns to an already-processed hash is still recognised.
#[derive(Debug, Default)]
pub struct BatchQueue {
    lanes: [Vec<PendingChange>; 4],
    last_change: HashMap<PathBuf, LastChange>,
    /// Path -> (lane, index) of its most recent pending entry.
    pending: HashMap<PathBuf, (usize, usize)>,
    oldest: Option<Instant>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the known hash of a file without queueing a change.
    pub fn seed_hash(&mut self, path: PathBuf, hash: String) {
        self.last_change.insert(
            path,
            LastChange {
                hash: Some(hash),
                change_type: ChangeType::Modify,
                // Seeds must never count as a recent echo.
                at: Instant::now().checked_sub(Duration::from_secs(3600)).unwrap_or_else(Instant::now),
            },
        );
    }

    /// Last recorded hash for `path`.
    pub fn last_hash(&self, path: &std::path::Path) -> Option<&str> {
        self.last_change.get(path).and_then(|c| c.hash.as_deref())
    }

    /// True if `event` repeats the last recorded change of its path: same
    /// content hash, or no hash and the same change type within `window`.
    pub fn is_duplicate(&self, event: &ChangeEvent, window: Duration, now: Instant) -> bool {
        let Some(last) = self.last_change.get(&event.file_path) else {
            return false;
        };
        match (&event.content_hash, &last.hash) {
            (Some(new), Some(old)) => new == old && event.change_type != ChangeType::Delete,
            (None, _) => {
                last.change_type == event.change_type && now.saturating_duration_since(last.at) < window
            }
            (Some(_), None) => false,
        }
    }

    /// Update the dedup index with `event`.
    pub fn record(&mut self, event: &ChangeEvent, now: Instant) {
        self.last_change.insert(
            event.file_path.clone(),
            LastChange {
                hash: event.content_hash.clone(),
                change_type: event.change_type,
                at: now,
            },
        );
    }

    /// Fold a dropped duplicate into the pending entry of its path.
    /// Returns `false` when nothing for the path is pending.
    pub fn merge_duplicate(&mut self, path: &std::path::Path) -> bool {
        match self.pending.get(path) {
            Some(&(lane, index)) => {
                self.lanes[lane][index].duplicates += 1;
                true
            }
            None => false,
        }
    }

    /// Enqueue `event` in the lane of its priority.
    pub fn push(&mut self, event: ChangeEvent, now: Instant) {
        let lane = event.priority.lane();
        self.pending
            .insert(event.file_path.clone(), (lane, self.lanes[lane].len()));
        self.lanes[lane].push(PendingChange {
            event,
            duplicates: 0,
        });
        self.oldest.get_or_insert(now);
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(Vec::is_empty)
    }

    pub fn len_by_priority(&self, priority: Priority) -> usize {
        self.lanes[priority.lane()].len()
    }

    /// When the oldest pending change was queued.
    pub fn oldest(&self) -> Option<Instant> {
        self.oldest
    }

    /// Distinct pending paths, in processing order.
    pub fn pending_paths(&self) -> Vec<PathBuf> {
        let mut seen = std::collections::HashSet::new();
        self.lanes
            .iter()
            .flatten()
            .filter(|p| seen.insert(p.event.file_path.clone()))
            .map(|p| p.event.file_path.clone())
            .collect()
    }

    /// Empty every lane and coalesce the changes per path.
    ///
    /// Lanes are visited in priority order, so a path's position follows its
    /// highest-priority entry; the surviving event is the most recent one
    /// (highest id) and `consolidated_changes` counts every change folded in.
    pub fn drain(&mut self) -> Vec<CoalescedChange> {
        let mut order: Vec<CoalescedChange> = Vec::new();
        let mut position: HashMap<PathBuf, usize> = HashMap::new();

        for lane in &mut self.lanes {
            for pending in lane.drain(..) {
                let count = 1 + pending.duplicates;
                match position.get(&pending.event.file_path) {
                    Some(&i) => {
                        let entry = &mut order[i];
                        entry.consolidated_changes += count;
                        if pending.event.id > entry.event.id {
                            entry.event = pending.event;
                        }
                    }
                    None => {
                        position.insert(pending.event.file_path.clone(), order.len());
                        order.push(CoalescedChange {
                            event: pending.event,
                            consolidated_changes: count,
                        });
                    }
                }
            }
        }

        self.pending.clear();
        self.oldest = None;
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64, path: &str, hash: Option<&str>, priority: Priority) -> ChangeEvent {
        let mut e = ChangeEvent::new(path, ChangeType::Modify);
        e.id = id;
        e.content_hash = hash.map(str::to_owned);
        e.priority = priority;
        e
    }

    #[test]
    fn test_same_hash_is_duplicate() {
        let mut queue = BatchQueue::new();
        let now = Instant::now();
        let first = event(1, "a.ts", Some("h1"), Priority::Medium);
        queue.record(&first, now);

        let later = now + Duration::from_secs(10);
        assert!(queue.is_duplicate(&event(2, "a.ts", Some("h1"), Priority::Medium), Duration::from_millis(100), later));
        assert!(!queue.is_duplicate(&event(3, "a.ts", Some("h2"), Priority::Medium), Duration::from_millis(100), later));
        assert!(!queue.is_duplicate(&event(4, "b.ts", Some("h1"), Priority::Medium), Duration::from_millis(100), later));
    }

    #[test]
    fn test_hashless_echo_window() {
        let mut queue = BatchQueue::new();
        let now = Instant::now();
        queue.record(&event(1, "a.ts", None, Priority::Medium), now);
        let window = Duration::from_millis(100);

        let echo = event(2, "a.ts", None, Priority::Medium);
        assert!(queue.is_duplicate(&echo, window, now + Duration::from_millis(50)));
        assert!(!queue.is_duplicate(&echo, window, now + Duration::from_millis(150)));

        let mut delete = event(3, "a.ts", None, Priority::Medium);
        delete.change_type = ChangeType::Delete;
        assert!(
            !queue.is_duplicate(&delete, window, now + Duration::from_millis(10)),
            "a delete right after a modify is a real change"
        );
    }

    #[test]
    fn test_seeded_hash_suppresses_identical_content() {
        let mut queue = BatchQueue::new();
        queue.seed_hash(PathBuf::from("a.ts"), "h0".to_owned());
        assert_eq!(queue.last_hash(std::path::Path::new("a.ts")), Some("h0"));
        let e = event(1, "a.ts", Some("h0"), Priority::Medium);
        assert!(queue.is_duplicate(&e, Duration::from_millis(100), Instant::now()));
    }

    #[test]
    fn test_drain_orders_by_priority_and_keeps_latest() {
        let mut queue = BatchQueue::new();
        let now = Instant::now();
        queue.push(event(1, "low.ts", Some("a"), Priority::Low), now);
        queue.push(event(2, "shared.ts", Some("b"), Priority::Medium), now);
        queue.push(event(3, "high.ts", Some("c"), Priority::High), now);
        queue.push(event(4, "shared.ts", Some("d"), Priority::Low), now);
        assert!(queue.merge_duplicate(std::path::Path::new("shared.ts")));
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.len_by_priority(Priority::Low), 2);
        assert_eq!(
            queue.pending_paths(),
            vec![
                PathBuf::from("high.ts"),
                PathBuf::from("shared.ts"),
                PathBuf::from("low.ts")
            ]
        );

        let drained = queue.drain();
        let paths: Vec<_> = drained.iter().map(|c| c.event.file_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("high.ts"),
                PathBuf::from("shared.ts"),
                PathBuf::from("low.ts")
            ]
        );
        let shared = &drained[1];
        assert_eq!(shared.event.id, 4, "latest change wins");
        assert_eq!(shared.consolidated_changes, 3);
        assert!(queue.is_empty());
        assert_eq!(queue.oldest(), None);
        assert!(!queue.merge_duplicate(std::path::Path::new("shared.ts")));
    }
}
