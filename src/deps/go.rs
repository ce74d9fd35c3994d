use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{DependencyExtractor, RawDependency, line_of};
use crate::graph::edge::DependencyKind;
use crate::resolver::ProjectResolver;

const SINGLE_IMPORT: &str = r#"(?m)^[ \t]*import[ \t]+(?:[\w.]+[ \t]+)?"([^"]+)""#;
const IMPORT_BLOCK: &str = r"(?ms)^[ \t]*import[ \t]*\((.*?)\)";
const BLOCK_ENTRY: &str = r#"(?m)^[ \t]*(?:[\w.]+[ \t]+)?"([^"]+)""#;

static SINGLE_IMPORT_RE: OnceLock<Regex> = OnceLock::new();
static IMPORT_BLOCK_RE: OnceLock<Regex> = OnceLock::new();
static BLOCK_ENTRY_RE: OnceLock<Regex> = OnceLock::new();

fn single_import_re() -> &'static Regex {
    SINGLE_IMPORT_RE.get_or_init(|| Regex::new(SINGLE_IMPORT).expect("invalid go import regex"))
}

fn import_block_re() -> &'static Regex {
    IMPORT_BLOCK_RE.get_or_init(|| Regex::new(IMPORT_BLOCK).expect("invalid go import block regex"))
}

fn block_entry_re() -> &'static Regex {
    BLOCK_ENTRY_RE.get_or_init(|| Regex::new(BLOCK_ENTRY).expect("invalid go import entry regex"))
}

/// Go: `import "p"` and `import ( ... )` blocks. Only packages under the
/// module path declared in `go.mod` resolve; a package import depends on
/// every non-test file in the package directory.
pub struct GoExtractor;

impl DependencyExtractor for GoExtractor {
    fn extract(&self, source: &str) -> Vec<RawDependency> {
        let mut deps = Vec::new();
        for caps in single_import_re().captures_iter(source) {
            if let Some(m) = caps.get(1) {
                deps.push(RawDependency::new(
                    m.as_str(),
                    DependencyKind::Import,
                    line_of(source, m.start()),
                ));
            }
        }
        for block in import_block_re().captures_iter(source) {
            let Some(body) = block.get(1) else { continue };
            for caps in block_entry_re().captures_iter(body.as_str()) {
                if let Some(m) = caps.get(1) {
                    deps.push(RawDependency::new(
                        m.as_str(),
                        DependencyKind::Import,
                        line_of(source, body.start() + m.start()),
                    ));
                }
            }
        }
        deps.sort_by_key(|d| d.line);
        deps
    }

    fn resolve(&self, resolver: &ProjectResolver, _from: &Path, raw: &RawDependency) -> Vec<PathBuf> {
        let Some(module) = resolver.go_module() else {
            return Vec::new();
        };
        let package_dir = if raw.specifier == module {
            PathBuf::new()
        } else {
            match raw
                .specifier
                .strip_prefix(module)
                .and_then(|rest| rest.strip_prefix('/'))
            {
                Some(rest) => PathBuf::from(rest),
                None => return Vec::new(),
            }
        };
        resolver.go_package_files(&package_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_extract_single_and_block_imports() {
        let src = "package main\n\nimport \"fmt\"\n\nimport (\n\t\"os\"\n\tdb \"example.com/app/store\"\n\t_ \"example.com/app/plugins\"\n)\n";
        let deps = GoExtractor.extract(src);
        let specs: Vec<&str> = deps.iter().map(|d| d.specifier.as_str()).collect();
        assert_eq!(
            specs,
            vec!["fmt", "os", "example.com/app/store", "example.com/app/plugins"]
        );
        assert_eq!(deps[2].line, 7);
    }

    #[test]
    fn test_resolve_module_local_packages() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();
        fs::create_dir_all(dir.path().join("store")).unwrap();
        fs::write(dir.path().join("store/a.go"), "package store").unwrap();
        fs::write(dir.path().join("store/b.go"), "package store").unwrap();
        fs::write(dir.path().join("main.go"), "package main").unwrap();

        let resolver = ProjectResolver::new(dir.path());
        let resolve = |spec: &str| {
            GoExtractor.resolve(
                &resolver,
                Path::new("main.go"),
                &RawDependency::new(spec, DependencyKind::Import, 1),
            )
        };
        assert_eq!(
            resolve("example.com/app/store"),
            vec![PathBuf::from("store/a.go"), PathBuf::from("store/b.go")]
        );
        assert!(resolve("fmt").is_empty());
        assert!(resolve("example.com/application/x").is_empty());
    }
}
