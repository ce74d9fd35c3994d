//! Persisted analysis results and the content-hash-checked cache facade.

pub mod disk;
pub mod key;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::batch::InvalidationSink;
use crate::error::Result;
use crate::hasher::ContentHasher;
use crate::language::LanguageKind;

pub use disk::DiskStore;
pub use key::{CacheKey, KeyCodec};

/// Key-value blob storage addressed by encoded [`CacheKey`]s.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    /// Returns `false` when nothing was stored under `key`.
    fn delete(&self, key: &str) -> Result<bool>;
    /// Every stored key starting with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// What is stored per key: the analysis payload and the content hash of the
/// file it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAnalysis {
    content_hash: String,
    payload: Vec<u8>,
}

/// Content-validated access to cached analysis results.
///
/// A hit requires both the key (file, project, branch, commit, language) and
/// the current normalized content hash to match. An unknown hash is always a
/// miss.
pub struct AstCache {
    store: Arc<dyn CacheStore>,
    hasher: Arc<ContentHasher>,
    project_root: PathBuf,
    /// Branch used when invalidating through [`InvalidationSink`].
    branch: RwLock<String>,
}

impl std::fmt::Debug for AstCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstCache")
            .field("project_root", &self.project_root)
            .field("branch", &self.branch())
            .finish_non_exhaustive()
    }
}

impl AstCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        hasher: Arc<ContentHasher>,
        project_root: &Path,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            store,
            hasher,
            project_root: project_root.to_path_buf(),
            branch: RwLock::new(branch.into()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn branch(&self) -> String {
        self.branch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch the branch used for sink invalidations (after a checkout).
    pub fn set_branch(&self, branch: impl Into<String>) {
        *self.branch.write().unwrap_or_else(PoisonError::into_inner) = branch.into();
    }

    /// Cached payload for `file`, if present and computed from the current content.
    pub fn get(&self, file: &Path, project: &Path, branch: &str, commit: &str) -> Result<Option<Vec<u8>>> {
        let Some((key, hash)) = self.key_and_hash(file, project, branch, commit) else {
            return Ok(None);
        };
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        let cached: CachedAnalysis =
            match bincode::serde::decode_from_slice(&bytes, bincode::config::standard()) {
                Ok((cached, _)) => cached,
                Err(err) => {
                    tracing::debug!(%key, %err, "undecodable cached analysis");
                    return Ok(None);
                }
            };
        if cached.content_hash != hash {
            tracing::debug!(file = %file.display(), "content changed since caching");
            return Ok(None);
        }
        Ok(Some(cached.payload))
    }

    /// Store `payload` for the current content of `file`.
    ///
    /// Returns `false` (and stores nothing) when the file's language is not
    /// supported or its content cannot be hashed.
    pub fn set(
        &self,
        file: &Path,
        project: &Path,
        branch: &str,
        commit: &str,
        payload: &[u8],
    ) -> Result<bool> {
        let Some((key, hash)) = self.key_and_hash(file, project, branch, commit) else {
            return Ok(false);
        };
        let record = CachedAnalysis {
            content_hash: hash,
            payload: payload.to_vec(),
        };
        let bytes = bincode::serde::encode_to_vec(&record, bincode::config::standard())?;
        self.store.set(&key, &bytes)?;
        Ok(true)
    }

    /// Remove every entry of `file` on `branch` (all commits and languages).
    /// Returns how many entries were removed.
    pub fn invalidate_file(&self, file: &Path, project: &Path, branch: &str) -> Result<usize> {
        let rel = relative_to(file, project);
        let prefix = KeyCodec::file_prefix(project, branch, &rel);
        let mut removed = 0;
        for key in self.store.scan_prefix(&prefix)? {
            match self.store.delete(&key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        if removed > 0 {
            tracing::debug!(file = %rel.display(), branch, removed, "invalidated cached entries");
        }
        Ok(removed)
    }

    fn key_and_hash(
        &self,
        file: &Path,
        project: &Path,
        branch: &str,
        commit: &str,
    ) -> Option<(String, String)> {
        let rel = relative_to(file, project);
        let language = LanguageKind::from_path(&rel)?;
        let hash = self.hasher.hash_file(&project.join(&rel))?;
        let key = KeyCodec::encode(&CacheKey {
            file_path: rel,
            project_root: project.to_path_buf(),
            branch: branch.to_owned(),
            commit: commit.to_owned(),
            language,
        });
        Some((key, hash))
    }
}

impl InvalidationSink for AstCache {
    fn invalidate(&self, files: &[PathBuf]) -> Result<usize> {
        let branch = self.branch();
        let mut removed = 0;
        for file in files {
            removed += self.invalidate_file(file, &self.project_root, &branch)?;
        }
        Ok(removed)
    }
}

/// `file` relative to `project` when it lies inside it, unchanged otherwise.
fn relative_to(file: &Path, project: &Path) -> PathBuf {
    file.strip_prefix(project)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| file.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn cache() -> (tempfile::TempDir, AstCache) {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("app.ts"), "export const a = 1;\n").unwrap();
        let store = Arc::new(DiskStore::open(&dir.path().join("cache")).unwrap());
        let cache = AstCache::new(store, Arc::new(ContentHasher::new()), &project, "main");
        (dir, cache)
    }

    #[test]
    fn test_hit_requires_matching_content() {
        let (dir, cache) = cache();
        let project = dir.path().join("project");
        let file = Path::new("app.ts");

        assert!(cache.set(file, &project, "main", "c1", b"ast").unwrap());
        assert_eq!(cache.get(file, &project, "main", "c1").unwrap(), Some(b"ast".to_vec()));

        // Cosmetic edit: same normalized hash, still a hit.
        fs::write(project.join("app.ts"), "// note\nexport const a = 1;\n").unwrap();
        assert_eq!(cache.get(file, &project, "main", "c1").unwrap(), Some(b"ast".to_vec()));

        fs::write(project.join("app.ts"), "export const a = 2;\n").unwrap();
        assert_eq!(cache.get(file, &project, "main", "c1").unwrap(), None);
    }

    #[test]
    fn test_branch_and_commit_isolation() {
        let (dir, cache) = cache();
        let project = dir.path().join("project");
        let file = Path::new("app.ts");
        cache.set(file, &project, "main", "c1", b"ast").unwrap();
        assert_eq!(cache.get(file, &project, "feature", "c1").unwrap(), None);
        assert_eq!(cache.get(file, &project, "main", "c2").unwrap(), None);
    }

    #[test]
    fn test_missing_file_is_a_miss() {
        let (dir, cache) = cache();
        let project = dir.path().join("project");
        assert!(!cache.set(Path::new("gone.ts"), &project, "main", "c1", b"x").unwrap());
        assert_eq!(cache.get(Path::new("gone.ts"), &project, "main", "c1").unwrap(), None);
        assert!(!cache.set(Path::new("notes.md"), &project, "main", "c1", b"x").unwrap());
    }

    #[test]
    fn test_invalidate_file_is_idempotent() {
        let (dir, cache) = cache();
        let project = dir.path().join("project");
        let file = Path::new("app.ts");
        cache.set(file, &project, "main", "c1", b"one").unwrap();
        cache.set(file, &project, "main", "c2", b"two").unwrap();
        cache.set(file, &project, "other", "c1", b"three").unwrap();

        assert_eq!(cache.invalidate_file(file, &project, "main").unwrap(), 2);
        assert_eq!(cache.invalidate_file(file, &project, "main").unwrap(), 0);
        assert!(cache.get(file, &project, "other", "c1").unwrap().is_some());
    }

    #[test]
    fn test_sink_uses_current_branch() {
        let (dir, cache) = cache();
        let project = dir.path().join("project");
        let file = Path::new("app.ts");
        cache.set(file, &project, "main", "c1", b"m").unwrap();
        cache.set(file, &project, "dev", "c1", b"d").unwrap();

        cache.set_branch("dev");
        assert_eq!(cache.invalidate(&[PathBuf::from("app.ts")]).unwrap(), 1);
        assert!(cache.get(file, &project, "main", "c1").unwrap().is_some());
        assert!(cache.get(file, &project, "dev", "c1").unwrap().is_none());
    }
}
