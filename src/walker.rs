use std::path::PathBuf;

use crate::watcher::PathFilter;

/// Walk the filter's root and collect every tracked file as a
/// project-relative path, sorted.
///
/// Respects `.gitignore` (nested ones included, even outside a git
/// repository), prunes default-ignored and excluded directories without
/// descending into them, and keeps only watched extensions.
pub fn walk_project(filter: &PathFilter) -> Vec<PathBuf> {
    let root = filter.root().to_path_buf();
    let prune = filter.clone();
    let walker = ignore::WalkBuilder::new(&root)
        .standard_filters(true)
        // Read .gitignore files even when the directory is not inside a git repository.
        .require_git(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            match prune.relative(entry.path()) {
                Some(rel) if !rel.as_os_str().is_empty() && is_dir => !prune.is_ignored(&rel, true),
                _ => true,
            }
        })
        .build();

    let mut files = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(%err, "walk error");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if let Some(rel) = filter.relative(entry.path())
            && filter.accepts(&rel)
        {
            files.push(rel);
        }
    }
    files.sort();
    tracing::debug!(root = %root.display(), files = files.len(), "project walked");
    files
}
