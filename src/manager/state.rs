use serde::Serialize;

use crate::error::{AstCacheError, Result};

/// Lifecycle of a [`WatchManager`](super::WatchManager).
///
/// `Stopped -> Starting -> Watching <-> Paused -> Stopping -> Stopped`, with
/// `Error` reachable from any failed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    #[default]
    Stopped,
    Starting,
    Watching,
    Paused,
    Stopping,
    Error,
}

impl WatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchState::Stopped => "stopped",
            WatchState::Starting => "starting",
            WatchState::Watching => "watching",
            WatchState::Paused => "paused",
            WatchState::Stopping => "stopping",
            WatchState::Error => "error",
        }
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition(self, next: WatchState) -> bool {
        use WatchState::*;
        match (self, next) {
            (_, Error) => true,
            (Stopped, Starting)
            | (Starting, Watching)
            | (Watching, Paused)
            | (Paused, Watching)
            | (Watching, Stopping)
            | (Paused, Stopping)
            | (Stopping, Stopped)
            | (Error, Stopping)
            | (Error, Stopped) => true,
            _ => false,
        }
    }

    /// Validate a transition requested by `operation`.
    pub fn transition(self, next: WatchState, operation: &'static str) -> Result<WatchState> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(AstCacheError::State {
                operation,
                state: self.to_string(),
            })
        }
    }

    /// Watching or paused: the pipeline is wired.
    pub fn is_active(self) -> bool {
        matches!(self, WatchState::Watching | WatchState::Paused)
    }
}

impl std::fmt::Display for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_path_is_legal() {
        let path = [
            WatchState::Stopped,
            WatchState::Starting,
            WatchState::Watching,
            WatchState::Paused,
            WatchState::Watching,
            WatchState::Stopping,
            WatchState::Stopped,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions_are_state_errors() {
        assert!(!WatchState::Watching.can_transition(WatchState::Starting));
        assert!(!WatchState::Stopped.can_transition(WatchState::Paused));
        let err = WatchState::Watching
            .transition(WatchState::Starting, "initialize")
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot initialize while watching");
    }

    #[test]
    fn test_error_reachable_and_recoverable() {
        for state in [WatchState::Starting, WatchState::Watching, WatchState::Stopping] {
            assert!(state.can_transition(WatchState::Error));
        }
        assert!(WatchState::Error.can_transition(WatchState::Stopped));
    }
}
