use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::graph::edge::DependencyEdge;
use crate::language::LanguageKind;

/// Whether a file belongs to the main code base or to its tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Main,
    Test,
}

impl FileRole {
    /// Classify a project-relative path by the usual test naming conventions:
    /// `tests/`, `__tests__/`, `*.test.*`, `*.spec.*`, `test_*.py`, `*_test.py`, `*_test.go`.
    pub fn classify(path: &Path) -> FileRole {
        let in_test_dir = path.parent().is_some_and(|parent| {
            parent.components().any(|c| {
                matches!(
                    c.as_os_str().to_str(),
                    Some("test" | "tests" | "__tests__" | "__mocks__" | "spec" | "benches")
                )
            })
        });
        if in_test_dir {
            return FileRole::Test;
        }

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let stem = path.file_stem().and_then(|n| n.to_str()).unwrap_or("");
        let is_test_name = name.contains(".test.")
            || name.contains(".spec.")
            || (name.ends_with(".py") && (stem.starts_with("test_") || stem.ends_with("_test")))
            || name.ends_with("_test.go");

        if is_test_name {
            FileRole::Test
        } else {
            FileRole::Main
        }
    }
}

/// A file node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    /// Project-relative path.
    pub path: PathBuf,
    pub language: Option<LanguageKind>,
    pub role: FileRole,
    /// References that did not resolve inside the project (`to == None`).
    pub unresolved: Vec<DependencyEdge>,
}

impl FileNode {
    pub fn new(path: PathBuf) -> Self {
        let language = LanguageKind::from_path(&path);
        let role = FileRole::classify(&path);
        Self {
            path,
            language,
            role,
            unresolved: Vec::new(),
        }
    }
}
