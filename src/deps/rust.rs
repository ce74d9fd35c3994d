use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::{DependencyExtractor, RawDependency, line_of};
use crate::graph::edge::DependencyKind;
use crate::resolver::ProjectResolver;

const MOD_DECL: &str = r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?mod[ \t]+(\w+)[ \t]*;";
const USE_DECL: &str = r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?use[ \t]+((?:crate|super|self)(?:::\w+)+)";
const INCLUDE: &str = r#"\binclude_(?:str|bytes)!\s*\(\s*"([^"]+)"\s*\)"#;

static MOD_DECL_RE: OnceLock<Regex> = OnceLock::new();
static USE_DECL_RE: OnceLock<Regex> = OnceLock::new();
static INCLUDE_RE: OnceLock<Regex> = OnceLock::new();

fn mod_decl_re() -> &'static Regex {
    MOD_DECL_RE.get_or_init(|| Regex::new(MOD_DECL).expect("invalid mod regex"))
}

fn use_decl_re() -> &'static Regex {
    USE_DECL_RE.get_or_init(|| Regex::new(USE_DECL).expect("invalid use regex"))
}

fn include_re() -> &'static Regex {
    INCLUDE_RE.get_or_init(|| Regex::new(INCLUDE).expect("invalid include regex"))
}

/// Rust: `mod x;` declarations, crate-local `use` paths and
/// `include_str!`/`include_bytes!` assets.
///
/// Specifiers are tagged by prefix so `resolve` knows which rule applies:
/// `mod:x`, a `crate::`/`super::`/`self::` path, or `include:path`.
pub struct RustExtractor;

impl DependencyExtractor for RustExtractor {
    fn extract(&self, source: &str) -> Vec<RawDependency> {
        let mut deps = Vec::new();
        for caps in mod_decl_re().captures_iter(source) {
            if let Some(m) = caps.get(1) {
                deps.push(RawDependency::new(
                    format!("mod:{}", m.as_str()),
                    DependencyKind::Import,
                    line_of(source, m.start()),
                ));
            }
        }
        for caps in use_decl_re().captures_iter(source) {
            if let Some(m) = caps.get(1) {
                deps.push(RawDependency::new(
                    m.as_str(),
                    DependencyKind::Reference,
                    line_of(source, m.start()),
                ));
            }
        }
        for caps in include_re().captures_iter(source) {
            if let Some(m) = caps.get(1) {
                deps.push(RawDependency::new(
                    format!("include:{}", m.as_str()),
                    DependencyKind::Asset,
                    line_of(source, m.start()),
                ));
            }
        }
        deps.sort_by_key(|d| d.line);
        deps
    }

    fn resolve(&self, resolver: &ProjectResolver, from: &Path, raw: &RawDependency) -> Vec<PathBuf> {
        let spec = raw.specifier.as_str();
        let parent = from.parent().map(Path::to_path_buf).unwrap_or_default();

        if let Some(name) = spec.strip_prefix("mod:") {
            let dir = module_dir(from);
            return resolver
                .first_existing([dir.join(format!("{name}.rs")), dir.join(name).join("mod.rs")])
                .into_iter()
                .collect();
        }

        if let Some(rel) = spec.strip_prefix("include:") {
            return resolver.first_existing([parent.join(rel)]).into_iter().collect();
        }

        let mut segments: Vec<&str> = spec.split("::").collect();
        let base = match segments.first().copied() {
            Some("crate") => match crate_src_dir(from) {
                Some(src) => src,
                None => return Vec::new(),
            },
            Some("self") => module_dir(from),
            Some("super") => {
                let mut dir = module_dir(from);
                segments.remove(0);
                while segments.first() == Some(&"super") {
                    segments.remove(0);
                    dir.pop();
                }
                dir.pop();
                return find_module_path(resolver, &dir, &segments);
            }
            _ => return Vec::new(),
        };
        find_module_path(resolver, &base, &segments[1..])
    }
}

/// Try `a/b/c.rs`, `a/b/c/mod.rs`, then progressively shorter prefixes, since
/// the tail of a `use` path is often an item rather than a module.
fn find_module_path(resolver: &ProjectResolver, base: &Path, segments: &[&str]) -> Vec<PathBuf> {
    for len in (1..=segments.len()).rev() {
        let mut path = base.to_path_buf();
        for seg in &segments[..len] {
            path.push(seg);
        }
        let candidates = [path.with_extension("rs"), path.join("mod.rs")];
        if let Some(found) = resolver.first_existing(candidates) {
            return vec![found];
        }
    }
    Vec::new()
}

/// Directory holding the children of the module defined by `file`.
///
/// `mod.rs`, `lib.rs` and `main.rs` own their directory; `foo.rs` owns `foo/`.
fn module_dir(file: &Path) -> PathBuf {
    let parent = file.parent().map(Path::to_path_buf).unwrap_or_default();
    match file.file_stem().and_then(|s| s.to_str()) {
        Some("mod" | "lib" | "main") | None => parent,
        Some(stem) => parent.join(stem),
    }
}

/// Nearest ancestor directory named `src`, the crate root for `crate::` paths.
fn crate_src_dir(file: &Path) -> Option<PathBuf> {
    file.ancestors()
        .skip(1)
        .find(|dir| dir.file_name().is_some_and(|n| n == "src"))
        .map(Path::to_path_buf)
}
