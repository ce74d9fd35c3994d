use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How one file depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Static import, re-export, `require`, `mod`, `from x import y`.
    Import,
    /// Dynamic `import()` call.
    Dynamic,
    /// Path reference that is not an import (e.g. Rust `use crate::...`).
    Reference,
    /// Dependency on a configuration file (JSON, etc.).
    Config,
    /// Dependency on a non-code asset (stylesheet, image, embedded file).
    Asset,
    /// Edge from a test file to the code under test.
    Test,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Import => "import",
            DependencyKind::Dynamic => "dynamic",
            DependencyKind::Reference => "reference",
            DependencyKind::Config => "config",
            DependencyKind::Asset => "asset",
            DependencyKind::Test => "test",
        }
    }
}

/// A single dependency extracted from a source file.
///
/// `to` is `None` for references that did not resolve to a file inside the
/// project (packages, builtins, missing files). Such edges are kept for
/// reporting but never participate in invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Project-relative path of the depending file.
    pub from: PathBuf,
    /// Project-relative path of the dependency, if it resolved.
    pub to: Option<PathBuf>,
    pub kind: DependencyKind,
    /// The specifier as written in source, e.g. `"./util"`.
    pub raw: String,
    /// 1-based line of the reference.
    pub line: usize,
}
