//! Additive git hook integration.
//!
//! Our hook logic lives in a delimited block appended to `pre-commit` and
//! `post-commit`. Existing hook content is never rewritten: install appends
//! the block once, uninstall removes only the block.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{AstCacheError, Result};
use crate::watcher::git;

pub const HOOK_NAMES: &[&str] = &["pre-commit", "post-commit"];

pub const BLOCK_START: &str = "# >>> ast-cache >>>";
pub const BLOCK_END: &str = "# <<< ast-cache <<<";

const SHEBANG: &str = "#!/bin/sh";

/// What install or uninstall did to one hook file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    Installed,
    AlreadyPresent,
    Removed,
    /// The file held nothing but our block and was deleted.
    FileRemoved,
    NotPresent,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookReport {
    pub hook: String,
    pub path: PathBuf,
    pub action: HookAction,
}

/// Directory holding the hooks of the repository at `root`.
pub fn hooks_dir(root: &Path) -> Result<PathBuf> {
    git::git_dir(root)
        .map(|dir| dir.join("hooks"))
        .ok_or_else(|| AstCacheError::validation("project", format!("{} is not a git repository", root.display())))
}

/// Install our block into every managed hook. `program` is the command the
/// hook runs (normally the `ast-cache` binary path).
pub fn install_hooks(root: &Path, program: &str) -> Result<Vec<HookReport>> {
    let dir = hooks_dir(root)?;
    std::fs::create_dir_all(&dir).map_err(|e| AstCacheError::io(&dir, e))?;
    HOOK_NAMES
        .iter()
        .map(|name| {
            let path = dir.join(name);
            let action = install_hook(&path, &hook_block(program, name, root))?;
            tracing::info!(hook = name, ?action, "git hook install");
            Ok(HookReport {
                hook: (*name).to_owned(),
                path,
                action,
            })
        })
        .collect()
}

/// Remove our block from every managed hook.
pub fn uninstall_hooks(root: &Path) -> Result<Vec<HookReport>> {
    let dir = hooks_dir(root)?;
    HOOK_NAMES
        .iter()
        .map(|name| {
            let path = dir.join(name);
            let action = uninstall_hook(&path)?;
            tracing::info!(hook = name, ?action, "git hook uninstall");
            Ok(HookReport {
                hook: (*name).to_owned(),
                path,
                action,
            })
        })
        .collect()
}

/// The delimited block for one hook. Failures never block the commit.
pub fn hook_block(program: &str, hook: &str, root: &Path) -> String {
    format!(
        "{BLOCK_START}\n\
         # Managed by ast-cache; remove with `ast-cache hooks uninstall`.\n\
         '{program}' hook {hook} '{}' || true\n\
         {BLOCK_END}\n",
        root.display()
    )
}

/// Append `block` to the hook at `path` unless a block is already there.
pub fn install_hook(path: &Path, block: &str) -> Result<HookAction> {
    let existing = read_optional(path)?;
    let contents = match existing {
        Some(text) if text.contains(BLOCK_START) => return Ok(HookAction::AlreadyPresent),
        Some(text) if !text.trim().is_empty() => {
            let mut text = text;
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push('\n');
            text.push_str(block);
            text
        }
        _ => format!("{SHEBANG}\n\n{block}"),
    };
    std::fs::write(path, contents).map_err(|e| AstCacheError::io(path, e))?;
    make_executable(path)?;
    Ok(HookAction::Installed)
}

/// Remove our block from the hook at `path`, deleting the file if nothing
/// but a shebang would remain. A start marker without an end marker is left
/// alone.
pub fn uninstall_hook(path: &Path) -> Result<HookAction> {
    let Some(text) = read_optional(path)? else {
        return Ok(HookAction::NotPresent);
    };
    let Some(start) = text.find(BLOCK_START) else {
        return Ok(HookAction::NotPresent);
    };
    let Some(end_rel) = text[start..].find(BLOCK_END) else {
        tracing::warn!(path = %path.display(), "unterminated ast-cache block, leaving hook untouched");
        return Ok(HookAction::NotPresent);
    };
    let mut end = start + end_rel + BLOCK_END.len();
    if text[end..].starts_with('\n') {
        end += 1;
    }

    let mut remaining = String::with_capacity(text.len());
    remaining.push_str(text[..start].trim_end_matches('\n'));
    if !remaining.is_empty() {
        remaining.push('\n');
    }
    remaining.push_str(&text[end..]);

    let meaningful = remaining
        .lines()
        .any(|line| !line.trim().is_empty() && !line.starts_with("#!"));
    if meaningful {
        std::fs::write(path, remaining).map_err(|e| AstCacheError::io(path, e))?;
        Ok(HookAction::Removed)
    } else {
        std::fs::remove_file(path).map_err(|e| AstCacheError::io(path, e))?;
        Ok(HookAction::FileRemoved)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AstCacheError::io(path, err)),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)
        .map_err(|e| AstCacheError::io(path, e))?
        .permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms).map_err(|e| AstCacheError::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
