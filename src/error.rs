//! Error types for the cache, tracker, watcher and cleaner.

use std::path::{Path, PathBuf};

/// Errors surfaced by the cache subsystem.
///
/// Most runtime failures are tolerated: they are logged and counted by the
/// orchestrator instead of being propagated. Only configuration problems are
/// expected to reach callers synchronously.
#[derive(Debug, thiserror::Error)]
pub enum AstCacheError {
    /// A configuration value or runtime option was rejected.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// The option or argument that failed validation.
        field: String,
        /// Description of the problem.
        reason: String,
    },

    /// A persisted cache key could not be decoded and is permanently unaddressable.
    #[error("orphaned cache entry {key:?}: {reason}")]
    Orphan {
        /// The raw key (or storage location when no key could be read).
        key: String,
        /// Why decoding failed.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Work was refused because a resource cap was reached.
    #[error("resource exhausted: {reason}")]
    ResourceExhausted {
        /// Which limit was hit.
        reason: String,
    },

    /// A lifecycle method was invoked in the wrong state.
    #[error("cannot {operation} while {state}")]
    State {
        /// The rejected operation.
        operation: &'static str,
        /// The state the component was in.
        state: String,
    },

    /// The OS file watcher reported an error.
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// A stored entry could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the failure.
        reason: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AstCacheError>;

impl AstCacheError {
    /// Build an [`AstCacheError::Io`] for `path`.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Build an [`AstCacheError::Validation`].
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for "not found" I/O races (a file vanished between listing and use).
    ///
    /// These are expected during cleanup and watching and are silently tolerated.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<serde_json::Error> for AstCacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<bincode::error::EncodeError> for AstCacheError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<bincode::error::DecodeError> for AstCacheError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}
