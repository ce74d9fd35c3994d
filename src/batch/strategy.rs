use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When queued changes are flushed into the invalidation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// Flush once the batch window has elapsed since the last flush.
    TimeBased,
    /// Flush once the queue holds `max_batch_size` changes.
    CountBased,
    /// Flush once the estimated invalidation scope reaches `max_scope_size`.
    SizeBased,
    /// First of count, max wait or scope to trigger.
    #[default]
    Hybrid,
    /// Every change is processed on its own, without queueing.
    Immediate,
}

impl BatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStrategy::TimeBased => "time_based",
            BatchStrategy::CountBased => "count_based",
            BatchStrategy::SizeBased => "size_based",
            BatchStrategy::Hybrid => "hybrid",
            BatchStrategy::Immediate => "immediate",
        }
    }

    /// True when the scope estimate is needed to evaluate this strategy.
    pub fn uses_scope(&self) -> bool {
        matches!(self, BatchStrategy::SizeBased | BatchStrategy::Hybrid)
    }
}

impl std::fmt::Display for BatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    Window,
    Count,
    Scope,
    MaxWait,
    Immediate,
    Forced,
}

/// Tuning parameters for the batch engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSettings {
    pub strategy: BatchStrategy,
    pub batch_window: Duration,
    pub max_batch_size: usize,
    pub max_scope_size: usize,
    pub max_wait: Duration,
    /// A hash-less change to a path within this window of the previous change
    /// of the same type is dropped as a notification echo.
    pub dedup_window: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            strategy: BatchStrategy::Hybrid,
            batch_window: Duration::from_millis(500),
            max_batch_size: 50,
            max_scope_size: 200,
            max_wait: Duration::from_millis(2_000),
            dedup_window: Duration::from_millis(100),
        }
    }
}

/// Queue state a strategy decision is based on.
#[derive(Debug, Clone, Copy)]
pub struct QueueSnapshot {
    pub queued: usize,
    /// Age of the oldest queued change.
    pub oldest_age: Duration,
    pub since_last_flush: Duration,
}

impl BatchSettings {
    /// Decide whether the queue should be flushed now.
    ///
    /// `scope` is only called for strategies that look at the invalidation
    /// scope, since estimating it walks the dependency graph.
    pub fn evaluate(&self, snapshot: QueueSnapshot, scope: impl FnOnce() -> usize) -> Option<FlushTrigger> {
        if snapshot.queued == 0 {
            return None;
        }
        match self.strategy {
            BatchStrategy::Immediate => Some(FlushTrigger::Immediate),
            BatchStrategy::TimeBased => {
                (snapshot.since_last_flush >= self.batch_window).then_some(FlushTrigger::Window)
            }
            BatchStrategy::CountBased => {
                (snapshot.queued >= self.max_batch_size).then_some(FlushTrigger::Count)
            }
            BatchStrategy::SizeBased => (scope() >= self.max_scope_size).then_some(FlushTrigger::Scope),
            BatchStrategy::Hybrid => {
                if snapshot.queued >= self.max_batch_size {
                    Some(FlushTrigger::Count)
                } else if snapshot.oldest_age >= self.max_wait {
                    Some(FlushTrigger::MaxWait)
                } else if scope() >= self.max_scope_size {
                    Some(FlushTrigger::Scope)
                } else {
                    None
                }
            }
        }
    }

    /// How long after the first queued change the fallback timer fires.
    ///
    /// Time-based batching flushes on its window; the other queued strategies
    /// are bounded by `max_wait` so a quiet queue never holds changes forever.
    pub fn timer_delay(&self) -> Option<Duration> {
        match self.strategy {
            BatchStrategy::Immediate => None,
            BatchStrategy::TimeBased => Some(self.batch_window),
            _ => Some(self.max_wait),
        }
    }

    /// Trigger recorded when the fallback timer fires.
    pub fn timer_trigger(&self) -> FlushTrigger {
        match self.strategy {
            BatchStrategy::TimeBased => FlushTrigger::Window,
            _ => FlushTrigger::MaxWait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(queued: usize, oldest_ms: u64, since_flush_ms: u64) -> QueueSnapshot {
        QueueSnapshot {
            queued,
            oldest_age: Duration::from_millis(oldest_ms),
            since_last_flush: Duration::from_millis(since_flush_ms),
        }
    }

    fn settings(strategy: BatchStrategy) -> BatchSettings {
        BatchSettings {
            strategy,
            max_batch_size: 3,
            max_scope_size: 10,
            ..BatchSettings::default()
        }
    }

    #[test]
    fn test_empty_queue_never_flushes() {
        for strategy in [
            BatchStrategy::TimeBased,
            BatchStrategy::CountBased,
            BatchStrategy::SizeBased,
            BatchStrategy::Hybrid,
            BatchStrategy::Immediate,
        ] {
            assert_eq!(settings(strategy).evaluate(snapshot(0, 10_000, 10_000), || 1_000), None);
        }
    }

    #[test]
    fn test_count_based() {
        let s = settings(BatchStrategy::CountBased);
        assert_eq!(s.evaluate(snapshot(2, 0, 0), || 0), None);
        assert_eq!(s.evaluate(snapshot(3, 0, 0), || 0), Some(FlushTrigger::Count));
    }

    #[test]
    fn test_time_based() {
        let s = settings(BatchStrategy::TimeBased);
        assert_eq!(s.evaluate(snapshot(100, 0, 499), || 0), None);
        assert_eq!(s.evaluate(snapshot(1, 0, 500), || 0), Some(FlushTrigger::Window));
    }

    #[test]
    fn test_size_based_only_estimates_when_needed() {
        let s = settings(BatchStrategy::SizeBased);
        assert_eq!(s.evaluate(snapshot(1, 0, 0), || 9), None);
        assert_eq!(s.evaluate(snapshot(1, 0, 0), || 10), Some(FlushTrigger::Scope));

        let count = settings(BatchStrategy::CountBased);
        let trigger = count.evaluate(snapshot(1, 0, 0), || panic!("scope must not be estimated"));
        assert_eq!(trigger, None);
    }

    #[test]
    fn test_hybrid_takes_first_trigger() {
        let s = settings(BatchStrategy::Hybrid);
        assert_eq!(s.evaluate(snapshot(3, 0, 0), || 100), Some(FlushTrigger::Count));
        assert_eq!(s.evaluate(snapshot(1, 2_000, 0), || 100), Some(FlushTrigger::MaxWait));
        assert_eq!(s.evaluate(snapshot(1, 0, 0), || 100), Some(FlushTrigger::Scope));
        assert_eq!(s.evaluate(snapshot(1, 0, 0), || 1), None);
    }

    #[test]
    fn test_timer_delay_per_strategy() {
        assert_eq!(settings(BatchStrategy::Immediate).timer_delay(), None);
        assert_eq!(
            settings(BatchStrategy::TimeBased).timer_delay(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            settings(BatchStrategy::Hybrid).timer_delay(),
            Some(Duration::from_millis(2_000))
        );
    }
}
