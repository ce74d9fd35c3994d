use std::path::{Path, PathBuf};

use serde::Serialize;

/// Kind of repository metadata change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GitOperation {
    /// `HEAD` changed: checkout, switch or detached-HEAD commit.
    BranchSwitch,
    /// The index changed: `git add`, `git reset`.
    Staging,
    /// A ref changed: commit, fetch, branch creation.
    RefUpdate,
    /// A reflog entry was appended.
    LogUpdate,
}

impl GitOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitOperation::BranchSwitch => "branch_switch",
            GitOperation::Staging => "staging",
            GitOperation::RefUpdate => "ref_update",
            GitOperation::LogUpdate => "log_update",
        }
    }

    /// Classify a path relative to the git directory. Lock files, objects and
    /// anything else return `None`.
    pub fn classify(rel: &Path) -> Option<GitOperation> {
        let text = rel.to_string_lossy().replace('\\', "/");
        if text.ends_with(".lock") {
            return None;
        }
        match text.as_str() {
            "HEAD" => Some(GitOperation::BranchSwitch),
            "index" => Some(GitOperation::Staging),
            "packed-refs" | "ORIG_HEAD" | "FETCH_HEAD" => Some(GitOperation::RefUpdate),
            t if t.starts_with("refs/") => Some(GitOperation::RefUpdate),
            t if t.starts_with("logs/") => Some(GitOperation::LogUpdate),
            _ => None,
        }
    }
}

/// The checked-out branch and commit of a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GitState {
    /// `None` for a detached HEAD.
    pub branch: Option<String>,
    pub commit: Option<String>,
}

impl GitState {
    /// Read `HEAD` of the repository at `root` without invoking git.
    ///
    /// Returns `None` when `root` is not a repository.
    pub fn read(root: &Path) -> Option<GitState> {
        let git_dir = git_dir(root)?;
        let head = std::fs::read_to_string(git_dir.join("HEAD")).ok()?;
        let head = head.trim();

        match head.strip_prefix("ref:") {
            Some(reference) => {
                let reference = reference.trim();
                let branch = reference
                    .strip_prefix("refs/heads/")
                    .unwrap_or(reference)
                    .to_owned();
                let commit = resolve_ref(&git_dir, reference);
                Some(GitState {
                    branch: Some(branch),
                    commit,
                })
            }
            None if !head.is_empty() => Some(GitState {
                branch: None,
                commit: Some(head.to_owned()),
            }),
            None => None,
        }
    }

    /// Branch name used to namespace cache entries. Detached HEADs share the
    /// empty branch.
    pub fn cache_branch(&self) -> String {
        self.branch.clone().unwrap_or_default()
    }

    pub fn cache_commit(&self) -> String {
        self.commit.clone().unwrap_or_default()
    }
}

/// Locate the git directory of `root`: `.git` itself, or the directory a
/// `.git` file points to (worktrees, submodules).
pub fn git_dir(root: &Path) -> Option<PathBuf> {
    let dot_git = root.join(".git");
    if dot_git.is_dir() {
        return Some(dot_git);
    }
    let contents = std::fs::read_to_string(&dot_git).ok()?;
    let target = contents.trim().strip_prefix("gitdir:")?.trim();
    let path = PathBuf::from(target);
    let path = if path.is_absolute() { path } else { root.join(path) };
    path.is_dir().then_some(path)
}

/// Commit a ref points to, from the loose ref file or `packed-refs`.
fn resolve_ref(git_dir: &Path, reference: &str) -> Option<String> {
    if let Ok(loose) = std::fs::read_to_string(git_dir.join(reference)) {
        let sha = loose.trim();
        if !sha.is_empty() {
            return Some(sha.to_owned());
        }
    }
    let packed = std::fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed.lines().find_map(|line| {
        if line.starts_with('#') || line.starts_with('^') {
            return None;
        }
        let (sha, name) = line.split_once(' ')?;
        (name.trim() == reference).then(|| sha.to_owned())
    })
}
