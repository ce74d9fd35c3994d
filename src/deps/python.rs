use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{DependencyExtractor, RawDependency, line_of};
use crate::graph::edge::DependencyKind;
use crate::resolver::ProjectResolver;

const FROM_IMPORT: &str = r"(?m)^[ \t]*from[ \t]+(\.*[\w.]*)[ \t]+import[ \t]+\(?([^)#\n]*)";
const PLAIN_IMPORT: &str = r"(?m)^[ \t]*import[ \t]+([\w.]+(?:[ \t]+as[ \t]+\w+)?(?:[ \t]*,[ \t]*[\w.]+(?:[ \t]+as[ \t]+\w+)?)*)";
const DYNAMIC_IMPORT: &str = r#"\bimportlib\.import_module\(\s*["']([\w.]+)["']"#;

static FROM_IMPORT_RE: OnceLock<Regex> = OnceLock::new();
static PLAIN_IMPORT_RE: OnceLock<Regex> = OnceLock::new();
static DYNAMIC_IMPORT_RE: OnceLock<Regex> = OnceLock::new();

fn from_import_re() -> &'static Regex {
    FROM_IMPORT_RE.get_or_init(|| Regex::new(FROM_IMPORT).expect("invalid from-import regex"))
}

fn plain_import_re() -> &'static Regex {
    PLAIN_IMPORT_RE.get_or_init(|| Regex::new(PLAIN_IMPORT).expect("invalid import regex"))
}

fn dynamic_import_re() -> &'static Regex {
    DYNAMIC_IMPORT_RE.get_or_init(|| Regex::new(DYNAMIC_IMPORT).expect("invalid import_module regex"))
}

/// Python: `import a.b`, `from .x import y`, `importlib.import_module("m")`.
///
/// For `from <dots> import name` (a bare relative package) each imported name
/// is also tried as a submodule, since `from . import models` usually refers
/// to `models.py`.
pub struct PythonExtractor;

impl DependencyExtractor for PythonExtractor {
    fn extract(&self, source: &str) -> Vec<RawDependency> {
        let mut deps = Vec::new();

        for caps in from_import_re().captures_iter(source) {
            let (Some(module), Some(names)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let line = line_of(source, module.start());
            let module = module.as_str();
            if !module.is_empty() && module.chars().all(|c| c == '.') {
                for name in split_names(names.as_str()) {
                    deps.push(RawDependency::new(
                        format!("{module}{name}"),
                        DependencyKind::Import,
                        line,
                    ));
                }
            } else {
                deps.push(RawDependency::new(module, DependencyKind::Import, line));
            }
        }

        for caps in plain_import_re().captures_iter(source) {
            let Some(list) = caps.get(1) else { continue };
            let line = line_of(source, list.start());
            for name in split_names(list.as_str()) {
                deps.push(RawDependency::new(name, DependencyKind::Import, line));
            }
        }

        for caps in dynamic_import_re().captures_iter(source) {
            if let Some(m) = caps.get(1) {
                deps.push(RawDependency::new(
                    m.as_str(),
                    DependencyKind::Dynamic,
                    line_of(source, m.start()),
                ));
            }
        }

        deps.sort_by_key(|d| d.line);
        deps
    }

    fn resolve(&self, resolver: &ProjectResolver, from: &Path, raw: &RawDependency) -> Vec<PathBuf> {
        let spec = raw.specifier.as_str();
        let dots = spec.chars().take_while(|&c| c == '.').count();
        let module_parts: Vec<&str> = spec[dots..].split('.').filter(|p| !p.is_empty()).collect();

        let bases: Vec<PathBuf> = if dots > 0 {
            let mut base = from.parent().map(Path::to_path_buf).unwrap_or_default();
            for _ in 1..dots {
                base.pop();
            }
            vec![base]
        } else {
            // Absolute imports: project root, a `src/` layout, then the importing package.
            let mut bases = vec![PathBuf::new(), PathBuf::from("src")];
            if let Some(parent) = from.parent() {
                bases.push(parent.to_path_buf());
            }
            bases
        };

        let mut candidates = Vec::new();
        for base in &bases {
            let mut module_path = base.clone();
            for part in &module_parts {
                module_path.push(part);
            }
            if module_parts.is_empty() {
                candidates.push(module_path.join("__init__.py"));
                continue;
            }
            candidates.push(module_path.with_extension("py"));
            candidates.push(module_path.with_extension("pyi"));
            candidates.push(module_path.join("__init__.py"));
        }

        resolver.first_existing(candidates).into_iter().collect()
    }
}

/// Split `a as b, c` (or `(a,\n b)`) into module/attribute names.
fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .filter_map(|part| {
            let name = part.split_whitespace().next()?;
            let name = name.trim_matches(|c| c == '(' || c == ')');
            if name.is_empty() || name == "*" {
                None
            } else {
                Some(name.to_owned())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_extract_import_forms() {
        let src = "import os\nimport pkg.models as m, util\nfrom .sibling import thing\nfrom . import views, forms as f\nfrom ..core.base import (Base,\n    Mixin)\nmod = importlib.import_module('plugins.extra')\n";
        let specs: Vec<String> = PythonExtractor
            .extract(src)
            .into_iter()
            .map(|d| d.specifier)
            .collect();
        assert_eq!(
            specs,
            vec![
                "os",
                "pkg.models",
                "util",
                ".sibling",
                ".views",
                ".forms",
                "..core.base",
                "plugins.extra"
            ]
        );
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("app/core")).unwrap();
        fs::write(root.join("app/__init__.py"), "").unwrap();
        fs::write(root.join("app/views.py"), "").unwrap();
        fs::write(root.join("app/core/__init__.py"), "").unwrap();
        fs::write(root.join("app/core/base.py"), "").unwrap();
        fs::write(root.join("app/core/models.py"), "").unwrap();

        let resolver = ProjectResolver::new(root);
        let from = Path::new("app/core/models.py");
        let resolve = |spec: &str| {
            PythonExtractor.resolve(
                &resolver,
                from,
                &RawDependency::new(spec, DependencyKind::Import, 1),
            )
        };

        assert_eq!(resolve(".base"), vec![PathBuf::from("app/core/base.py")]);
        assert_eq!(resolve("..views"), vec![PathBuf::from("app/views.py")]);
        assert_eq!(resolve("app.core"), vec![PathBuf::from("app/core/__init__.py")]);
        assert_eq!(resolve("."), vec![PathBuf::from("app/core/__init__.py")]);
        assert!(resolve("os").is_empty(), "stdlib modules are external");
    }
}
