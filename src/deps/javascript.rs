use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{DependencyExtractor, RawDependency, line_of};
use crate::graph::edge::DependencyKind;
use crate::resolver::ProjectResolver;

/// `import x from 'y'`, `import 'y'`, `export * from 'y'`, `import type { T } from 'y'`.
const STATIC_IMPORT: &str =
    r#"\b(?:import|export)\s+(?:type\s+)?(?:[\w*{}\s,$]+?\s+from\s*)?["']([^"'\n]+)["']"#;
/// `require('y')`
const REQUIRE: &str = r#"\brequire\s*\(\s*["']([^"'\n]+)["']\s*\)"#;
/// `import('y')`
const DYNAMIC_IMPORT: &str = r#"\bimport\s*\(\s*["']([^"'\n]+)["']\s*\)"#;

static STATIC_IMPORT_RE: OnceLock<Regex> = OnceLock::new();
static REQUIRE_RE: OnceLock<Regex> = OnceLock::new();
static DYNAMIC_IMPORT_RE: OnceLock<Regex> = OnceLock::new();

fn static_import_re() -> &'static Regex {
    STATIC_IMPORT_RE.get_or_init(|| Regex::new(STATIC_IMPORT).expect("invalid static import regex"))
}

fn require_re() -> &'static Regex {
    REQUIRE_RE.get_or_init(|| Regex::new(REQUIRE).expect("invalid require regex"))
}

fn dynamic_import_re() -> &'static Regex {
    DYNAMIC_IMPORT_RE.get_or_init(|| Regex::new(DYNAMIC_IMPORT).expect("invalid dynamic import regex"))
}

/// TypeScript and JavaScript: ESM imports and re-exports, CommonJS `require`,
/// and dynamic `import()`.
pub struct JavaScriptExtractor;

impl DependencyExtractor for JavaScriptExtractor {
    fn extract(&self, source: &str) -> Vec<RawDependency> {
        let mut deps = Vec::new();
        let patterns = [
            (static_import_re(), DependencyKind::Import),
            (require_re(), DependencyKind::Import),
            (dynamic_import_re(), DependencyKind::Dynamic),
        ];
        for (re, kind) in patterns {
            for caps in re.captures_iter(source) {
                if let Some(m) = caps.get(1) {
                    deps.push(RawDependency::new(m.as_str(), kind, line_of(source, m.start())));
                }
            }
        }
        deps.sort_by_key(|d| d.line);
        deps
    }

    fn resolve(&self, resolver: &ProjectResolver, from: &Path, raw: &RawDependency) -> Vec<PathBuf> {
        resolver
            .resolve_js(from, &raw.specifier)
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifiers(source: &str) -> Vec<(String, DependencyKind)> {
        JavaScriptExtractor
            .extract(source)
            .into_iter()
            .map(|d| (d.specifier, d.kind))
            .collect()
    }

    #[test]
    fn test_esm_forms() {
        let src = r#"
import React from 'react';
import { a, b } from "./ab";
import * as ns from './ns';
import './side-effect';
import type { T } from './types';
import Def, {
  named,
  other,
} from './multi';
export * from './barrel';
export { x } from './reexport';
"#;
        let found: Vec<String> = specifiers(src).into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            found,
            vec![
                "react",
                "./ab",
                "./ns",
                "./side-effect",
                "./types",
                "./multi",
                "./barrel",
                "./reexport"
            ]
        );
    }

    #[test]
    fn test_require_and_dynamic_import() {
        let src = "const fs = require('fs');\nconst lazy = () => import('./lazy');\n";
        assert_eq!(
            specifiers(src),
            vec![
                ("fs".to_owned(), DependencyKind::Import),
                ("./lazy".to_owned(), DependencyKind::Dynamic),
            ]
        );
    }

    #[test]
    fn test_non_imports_ignored() {
        let src = "export const name = 'value';\nexport default 'text';\nconst s = \"import x from 'y'\".length;";
        let found = specifiers(src);
        assert!(
            !found.iter().any(|(s, _)| s == "value" || s == "text"),
            "string exports are not dependencies: {found:?}"
        );
    }

    #[test]
    fn test_line_numbers() {
        let deps = JavaScriptExtractor.extract("\n\nimport './c';\n");
        assert_eq!(deps[0].line, 3);
    }
}
