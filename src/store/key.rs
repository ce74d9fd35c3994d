use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{AstCacheError, Result};
use crate::language::LanguageKind;

/// Format tag embedded in every encoded key.
pub const KEY_VERSION: &str = "v1";

/// Namespace used when no branch is known (detached HEAD, no repository).
pub const DETACHED_NAMESPACE: &str = "detached";

/// The logical address of one cached analysis result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Project-relative path of the analysed file.
    pub file_path: PathBuf,
    pub project_root: PathBuf,
    pub branch: String,
    pub commit: String,
    pub language: LanguageKind,
}

/// Encodes [`CacheKey`]s to opaque strings and back.
///
/// Layout: `<branch-namespace>/v1|<project>|<branch>|<file>|<commit>|<language>`.
/// Fields are `%`-escaped so `|` can never split a field. The namespace is a
/// filesystem-safe form of the branch plus a digest of the exact branch name,
/// so two branches never share a namespace and a checkout can never read
/// another branch's entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyCodec;

impl KeyCodec {
    pub fn encode(key: &CacheKey) -> String {
        format!(
            "{}{}|{}",
            Self::file_prefix(&key.project_root, &key.branch, &key.file_path),
            escape(&key.commit),
            key.language.as_str(),
        )
    }

    /// Decode a key produced by [`encode`](Self::encode). Any other shape is
    /// an [`AstCacheError::Orphan`].
    pub fn decode(encoded: &str) -> Result<CacheKey> {
        let orphan = |reason: &str| AstCacheError::Orphan {
            key: encoded.to_owned(),
            reason: reason.to_owned(),
        };

        let (namespace, body) = encoded
            .split_once('/')
            .ok_or_else(|| orphan("missing branch namespace"))?;
        let fields: Vec<&str> = body.split('|').collect();
        let [version, project, branch, file, commit, language] = fields.as_slice() else {
            return Err(orphan("wrong number of fields"));
        };
        if *version != KEY_VERSION {
            return Err(orphan("unknown key version"));
        }

        let branch = unescape(branch).ok_or_else(|| orphan("bad escape in branch"))?;
        if namespace != Self::branch_namespace(&branch) {
            return Err(orphan("namespace does not match branch"));
        }
        let project = unescape(project).ok_or_else(|| orphan("bad escape in project"))?;
        let file = unescape(file).ok_or_else(|| orphan("bad escape in file path"))?;
        let commit = unescape(commit).ok_or_else(|| orphan("bad escape in commit"))?;
        if file.is_empty() || project.is_empty() {
            return Err(orphan("empty file or project"));
        }
        let language = LanguageKind::ALL
            .into_iter()
            .find(|l| l.as_str() == *language)
            .ok_or_else(|| orphan("unknown language"))?;

        Ok(CacheKey {
            file_path: PathBuf::from(file),
            project_root: PathBuf::from(project),
            branch,
            commit,
            language,
        })
    }

    /// Prefix shared by every key of `file` on `branch`, across commits and
    /// languages.
    pub fn file_prefix(project_root: &Path, branch: &str, file_path: &Path) -> String {
        format!(
            "{}/{}|{}|{}|{}|",
            Self::branch_namespace(branch),
            KEY_VERSION,
            escape(&path_string(project_root)),
            escape(branch),
            escape(&path_string(file_path)),
        )
    }

    /// Prefix shared by every key of `branch`.
    pub fn branch_prefix(branch: &str) -> String {
        format!("{}/", Self::branch_namespace(branch))
    }

    /// Filesystem-safe, collision-free namespace for `branch`.
    pub fn branch_namespace(branch: &str) -> String {
        if branch.is_empty() {
            return DETACHED_NAMESPACE.to_owned();
        }
        let readable: String = branch
            .chars()
            .take(40)
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let digest = hex::encode(Sha256::digest(branch.as_bytes()));
        format!("{readable}-{}", &digest[..8])
    }
}

/// Forward-slash form of a path so keys are identical across platforms.
fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(field: &str) -> Option<String> {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "7C" => out.push('|'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(branch: &str) -> CacheKey {
        CacheKey {
            file_path: PathBuf::from("src/a|b%.ts"),
            project_root: PathBuf::from("/work/app"),
            branch: branch.to_owned(),
            commit: "abc123".to_owned(),
            language: LanguageKind::TypeScript,
        }
    }

    #[test]
    fn test_encode_decode_with_escapes() {
        let original = key("feature/login");
        let encoded = KeyCodec::encode(&original);
        assert!(encoded.starts_with(&KeyCodec::branch_namespace("feature/login")));
        assert!(encoded.ends_with("|abc123|typescript"), "{encoded}");
        assert_eq!(KeyCodec::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_branches_never_share_namespace() {
        let a = KeyCodec::branch_namespace("feature/x");
        let b = KeyCodec::branch_namespace("feature_x");
        assert_ne!(a, b);
        assert!(!a.contains('/'));
        assert_ne!(KeyCodec::encode(&key("main")), KeyCodec::encode(&key("feature")));
        assert_eq!(KeyCodec::branch_namespace(""), DETACHED_NAMESPACE);
    }

    #[test]
    fn test_file_prefix_matches_all_commits() {
        let mut k = key("main");
        let prefix = KeyCodec::file_prefix(&k.project_root, "main", &k.file_path);
        assert!(KeyCodec::encode(&k).starts_with(&prefix));
        k.commit = "def456".to_owned();
        k.language = LanguageKind::JavaScript;
        assert!(KeyCodec::encode(&k).starts_with(&prefix));
        assert!(KeyCodec::encode(&key("dev")).starts_with(&KeyCodec::branch_prefix("dev")));
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        let good = KeyCodec::encode(&key("main"));
        for bad in [
            "no-namespace".to_owned(),
            format!("{}/v1|too|few", KeyCodec::branch_namespace("main")),
            good.replace("|v1|", "|v9|").replacen("/v1|", "/v9|", 1),
            good.replace("typescript", "cobol"),
            good.replace("%7C", "%ZZ"),
            good.replacen(&KeyCodec::branch_namespace("main"), "other-00000000", 1),
        ] {
            let err = KeyCodec::decode(&bad).unwrap_err();
            assert!(matches!(err, AstCacheError::Orphan { .. }), "{bad} -> {err}");
        }
    }
}
