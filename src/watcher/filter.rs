use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::language::LanguageKind;

/// Directory names that are never watched or tracked.
pub const DEFAULT_IGNORES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "coverage",
    "__pycache__",
    ".venv",
    ".ast-cache",
];

/// Decides which paths under a project root are tracked: extension of a
/// supported language, not under a default-ignored directory, not matched by
/// the root `.gitignore`, configured excludes or the cache directory.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    extensions: HashSet<String>,
    gitignore: Gitignore,
    excludes: Vec<glob::Pattern>,
    cache_dir: Option<PathBuf>,
}

impl PathFilter {
    /// Build a filter for `root`. Invalid exclude patterns are skipped with a
    /// warning; configuration validation reports them earlier.
    pub fn new(
        root: &Path,
        languages: &[LanguageKind],
        excludes: &[String],
        cache_dir: Option<&Path>,
    ) -> Self {
        let extensions = languages
            .iter()
            .flat_map(|l| l.extensions().iter().map(|e| (*e).to_owned()))
            .collect();
        let excludes = excludes
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    tracing::warn!(pattern = %p, %err, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();
        let cache_dir = cache_dir.and_then(|dir| {
            let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
            dir.strip_prefix(root).ok().map(Path::to_path_buf)
        });

        Self {
            root: root.to_path_buf(),
            extensions,
            gitignore: build_gitignore_matcher(root),
            excludes,
            cache_dir,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project-relative form of `path` (absolute or already relative).
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            path.strip_prefix(&self.root).ok().map(Path::to_path_buf)
        } else {
            Some(path.to_path_buf())
        }
    }

    /// True if the file extension belongs to a watched language.
    pub fn has_watched_extension(&self, rel: &Path) -> bool {
        rel.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(e))
    }

    /// True if `rel` (or one of its parents) is excluded.
    pub fn is_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        if rel.components().any(|c| match c {
            Component::Normal(name) => name.to_str().is_some_and(|n| DEFAULT_IGNORES.contains(&n)),
            _ => false,
        }) {
            return true;
        }
        if let Some(cache_dir) = &self.cache_dir
            && rel.starts_with(cache_dir)
        {
            return true;
        }
        if self
            .gitignore
            .matched_path_or_any_parents(rel, is_dir)
            .is_ignore()
        {
            return true;
        }
        let rel_str = rel.to_string_lossy();
        self.excludes.iter().any(|pattern| {
            pattern.matches(&rel_str)
                || rel.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .is_some_and(|s| pattern.matches(s))
                })
        })
    }

    /// Extension check first (cheap), then the ignore rules.
    pub fn accepts(&self, rel: &Path) -> bool {
        self.has_watched_extension(rel) && !self.is_ignored(rel, false)
    }
}

/// Matcher for the root `.gitignore`. A missing or unreadable file matches nothing.
fn build_gitignore_matcher(project_root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(project_root);
    let gitignore_path = project_root.join(".gitignore");
    if gitignore_path.exists()
        && let Some(err) = builder.add(&gitignore_path)
    {
        tracing::debug!(%err, "partially unreadable .gitignore");
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn filter(dir: &Path, excludes: &[&str]) -> PathFilter {
        let excludes: Vec<String> = excludes.iter().map(|s| (*s).to_owned()).collect();
        PathFilter::new(
            dir,
            &[LanguageKind::TypeScript, LanguageKind::Json],
            &excludes,
            Some(&dir.join(".cache-out")),
        )
    }

    #[test]
    fn test_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        let f = filter(dir.path(), &[]);
        assert!(f.accepts(Path::new("src/app.ts")));
        assert!(f.accepts(Path::new("tsconfig.json")));
        assert!(!f.accepts(Path::new("src/app.py")));
        assert!(!f.accepts(Path::new("README")));
    }

    #[test]
    fn test_default_and_configured_ignores() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".cache-out")).unwrap();
        let f = filter(dir.path(), &["*.generated.ts", "fixtures"]);
        assert!(!f.accepts(Path::new("node_modules/pkg/index.ts")));
        assert!(!f.accepts(Path::new(".git/HEAD.ts")));
        assert!(!f.accepts(Path::new("src/api.generated.ts")));
        assert!(!f.accepts(Path::new("test/fixtures/a.ts")));
        assert!(!f.accepts(Path::new(".cache-out/x.json")));
        assert!(f.accepts(Path::new("src/api.ts")));
    }

    #[test]
    fn test_gitignore_respected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "generated/\n*.tmp.ts\n").unwrap();
        let f = filter(dir.path(), &[]);
        assert!(!f.accepts(Path::new("generated/schema.ts")));
        assert!(!f.accepts(Path::new("src/x.tmp.ts")));
        assert!(f.accepts(Path::new("src/x.ts")));
    }

    #[test]
    fn test_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let f = filter(dir.path(), &[]);
        assert_eq!(
            f.relative(&dir.path().join("src/a.ts")),
            Some(PathBuf::from("src/a.ts"))
        );
        assert_eq!(f.relative(Path::new("/elsewhere/a.ts")), None);
        assert_eq!(f.relative(Path::new("a.ts")), Some(PathBuf::from("a.ts")));
    }
}
