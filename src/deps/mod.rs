//! Per-language dependency extraction.
//!
//! Each language implements [`DependencyExtractor`]: a cheap static scan that
//! finds dependency specifiers, and a resolution step that maps a specifier to
//! files inside the project. Graph building and invalidation only see the
//! resulting [`DependencyEdge`]s, so a heuristic extractor can be swapped for
//! one driven by real parser output without touching them.

pub mod go;
pub mod javascript;
pub mod python;
pub mod rust;
pub mod style;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::graph::edge::{DependencyEdge, DependencyKind};
use crate::graph::node::FileRole;
use crate::language::LanguageKind;
use crate::resolver::ProjectResolver;

/// A dependency specifier found in source, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDependency {
    /// The specifier as written, e.g. `"./util"` or `"pkg.models"`.
    pub specifier: String,
    pub kind: DependencyKind,
    /// 1-based line of the reference.
    pub line: usize,
}

impl RawDependency {
    pub fn new(specifier: impl Into<String>, kind: DependencyKind, line: usize) -> Self {
        Self {
            specifier: specifier.into(),
            kind,
            line,
        }
    }
}

/// Language-specific dependency detection.
pub trait DependencyExtractor: Send + Sync {
    /// Scan `source` for dependency specifiers.
    fn extract(&self, source: &str) -> Vec<RawDependency>;

    /// Resolve `raw`, written in the project-relative file `from`, to
    /// project-relative files. An empty result means external or missing.
    fn resolve(&self, resolver: &ProjectResolver, from: &Path, raw: &RawDependency) -> Vec<PathBuf>;
}

/// Maps each language to its extractor.
#[derive(Clone)]
pub struct ExtractorRegistry {
    by_language: HashMap<LanguageKind, Arc<dyn DependencyExtractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut langs: Vec<_> = self.by_language.keys().collect();
        langs.sort();
        f.debug_struct("ExtractorRegistry").field("languages", &langs).finish()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let js: Arc<dyn DependencyExtractor> = Arc::new(javascript::JavaScriptExtractor);
        let mut registry = Self::empty();
        registry.register(LanguageKind::TypeScript, Arc::clone(&js));
        registry.register(LanguageKind::JavaScript, js);
        registry.register(LanguageKind::Python, Arc::new(python::PythonExtractor));
        registry.register(LanguageKind::Rust, Arc::new(rust::RustExtractor));
        registry.register(LanguageKind::Go, Arc::new(go::GoExtractor));
        registry.register(LanguageKind::Css, Arc::new(style::StyleExtractor));
        registry
    }
}

impl ExtractorRegistry {
    /// A registry with no extractors: every file is a leaf.
    pub fn empty() -> Self {
        Self {
            by_language: HashMap::new(),
        }
    }

    /// Install (or replace) the extractor for `language`.
    pub fn register(&mut self, language: LanguageKind, extractor: Arc<dyn DependencyExtractor>) {
        self.by_language.insert(language, extractor);
    }

    pub fn extractor_for(&self, language: LanguageKind) -> Option<&Arc<dyn DependencyExtractor>> {
        self.by_language.get(&language)
    }

    /// Extract and resolve every dependency of the project-relative file `from`.
    ///
    /// Unresolved specifiers are returned with `to = None`. The edge kind is
    /// refined by target: JSON targets become `config`, stylesheets and
    /// unknown file types imported from code become `asset`, and edges from a
    /// test file into main code become `test`.
    pub fn extract_dependencies(
        &self,
        resolver: &ProjectResolver,
        from: &Path,
        source: &str,
    ) -> Vec<DependencyEdge> {
        let Some(language) = LanguageKind::from_path(from) else {
            return Vec::new();
        };
        let Some(extractor) = self.extractor_for(language) else {
            return Vec::new();
        };

        let from_role = FileRole::classify(from);
        let mut edges = Vec::new();

        for raw in extractor.extract(source) {
            let targets = extractor.resolve(resolver, from, &raw);
            if targets.is_empty() {
                edges.push(DependencyEdge {
                    from: from.to_path_buf(),
                    to: None,
                    kind: raw.kind,
                    raw: raw.specifier.clone(),
                    line: raw.line,
                });
                continue;
            }
            for target in targets {
                let kind = refine_kind(raw.kind, language, from_role, &target);
                edges.push(DependencyEdge {
                    from: from.to_path_buf(),
                    to: Some(target),
                    kind,
                    raw: raw.specifier.clone(),
                    line: raw.line,
                });
            }
        }

        edges
    }
}

fn refine_kind(
    kind: DependencyKind,
    from_language: LanguageKind,
    from_role: FileRole,
    target: &Path,
) -> DependencyKind {
    if from_role == FileRole::Test && FileRole::classify(target) == FileRole::Main {
        return DependencyKind::Test;
    }
    if !matches!(kind, DependencyKind::Import | DependencyKind::Reference) {
        return kind;
    }
    match LanguageKind::from_path(target) {
        Some(LanguageKind::Json) => DependencyKind::Config,
        Some(LanguageKind::Css) if from_language != LanguageKind::Css => DependencyKind::Asset,
        None => DependencyKind::Asset,
        Some(_) => kind,
    }
}

/// 1-based line number of byte `offset` in `source`.
pub(crate) fn line_of(source: &str, offset: usize) -> usize {
    source.as_bytes()[..offset.min(source.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}
