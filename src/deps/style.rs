use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{DependencyExtractor, RawDependency, line_of};
use crate::graph::edge::DependencyKind;
use crate::resolver::ProjectResolver;

const AT_IMPORT: &str = r#"@(?:import|use|forward)\s+(?:url\(\s*)?["']([^"']+)["']"#;
const URL_REF: &str = r#"\burl\(\s*["']?([^"')\s]+)["']?\s*\)"#;

static AT_IMPORT_RE: OnceLock<Regex> = OnceLock::new();
static URL_REF_RE: OnceLock<Regex> = OnceLock::new();

fn at_import_re() -> &'static Regex {
    AT_IMPORT_RE.get_or_init(|| Regex::new(AT_IMPORT).expect("invalid @import regex"))
}

fn url_ref_re() -> &'static Regex {
    URL_REF_RE.get_or_init(|| Regex::new(URL_REF).expect("invalid url() regex"))
}

/// Stylesheets: `@import`/`@use`/`@forward` and `url(...)` references.
pub struct StyleExtractor;

impl DependencyExtractor for StyleExtractor {
    fn extract(&self, source: &str) -> Vec<RawDependency> {
        let mut deps = Vec::new();
        let mut import_spans = Vec::new();

        for caps in at_import_re().captures_iter(source) {
            if let (Some(whole), Some(m)) = (caps.get(0), caps.get(1)) {
                import_spans.push(whole.range());
                deps.push(RawDependency::new(
                    m.as_str(),
                    DependencyKind::Import,
                    line_of(source, m.start()),
                ));
            }
        }

        for caps in url_ref_re().captures_iter(source) {
            let Some(m) = caps.get(1) else { continue };
            // `@import url("x.css")` is already an import.
            if import_spans.iter().any(|span| span.contains(&m.start())) {
                continue;
            }
            let target = m.as_str();
            if is_remote(target) {
                continue;
            }
            deps.push(RawDependency::new(
                target,
                DependencyKind::Asset,
                line_of(source, m.start()),
            ));
        }

        deps.retain(|d| !is_remote(&d.specifier));
        deps.sort_by_key(|d| d.line);
        deps
    }

    fn resolve(&self, resolver: &ProjectResolver, from: &Path, raw: &RawDependency) -> Vec<PathBuf> {
        let dir = from.parent().map(Path::to_path_buf).unwrap_or_default();
        // Strip query strings and fragments from asset URLs (`font.woff?v=2#iefix`).
        let spec = raw
            .specifier
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let target = dir.join(spec);

        let mut candidates = vec![target.clone()];
        if raw.kind == DependencyKind::Import && target.extension().is_none() {
            // Sass partials: `@use "vars"` may mean `_vars.scss`.
            if let Some(name) = target.file_name().and_then(|n| n.to_str()) {
                let parent = target.parent().map(Path::to_path_buf).unwrap_or_default();
                candidates.push(parent.join(format!("{name}.scss")));
                candidates.push(parent.join(format!("_{name}.scss")));
                candidates.push(parent.join(format!("{name}.css")));
            }
        }
        resolver.first_existing(candidates).into_iter().collect()
    }
}

fn is_remote(target: &str) -> bool {
    target.starts_with("data:")
        || target.starts_with("http://")
        || target.starts_with("https://")
        || target.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_extract_imports_and_urls() {
        let src = "@import 'base.css';\n@use \"vars\";\n@import url(\"print.css\");\n.logo { background: url(img/logo.png); }\n.x { background: url(data:image/png;base64,AAAA); }\n@import 'https://fonts.example.com/x.css';\n";
        let specs: Vec<(String, DependencyKind)> = StyleExtractor
            .extract(src)
            .into_iter()
            .map(|d| (d.specifier, d.kind))
            .collect();
        assert_eq!(
            specs,
            vec![
                ("base.css".to_owned(), DependencyKind::Import),
                ("vars".to_owned(), DependencyKind::Import),
                ("print.css".to_owned(), DependencyKind::Import),
                ("img/logo.png".to_owned(), DependencyKind::Asset),
            ]
        );
    }

    #[test]
    fn test_resolve_partials_and_assets() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("styles/img")).unwrap();
        fs::write(dir.path().join("styles/_vars.scss"), "").unwrap();
        fs::write(dir.path().join("styles/img/logo.png"), "").unwrap();

        let resolver = ProjectResolver::new(dir.path());
        let from = Path::new("styles/main.scss");
        assert_eq!(
            StyleExtractor.resolve(
                &resolver,
                from,
                &RawDependency::new("vars", DependencyKind::Import, 1)
            ),
            vec![PathBuf::from("styles/_vars.scss")]
        );
        assert_eq!(
            StyleExtractor.resolve(
                &resolver,
                from,
                &RawDependency::new("img/logo.png?v=2", DependencyKind::Asset, 1)
            ),
            vec![PathBuf::from("styles/img/logo.png")]
        );
    }
}
