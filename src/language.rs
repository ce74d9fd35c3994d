use std::path::Path;

use serde::{Deserialize, Serialize};

/// A language whose files are cached, hashed and tracked for dependencies.
///
/// Uses a plain enum (not trait objects). Cheap to copy and pattern-matched at
/// dispatch boundaries: normalization in the hasher, extractor selection in the
/// tracker, and the language segment of cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageKind {
    TypeScript,
    JavaScript,
    Rust,
    Python,
    Go,
    Json,
    Css,
}

impl LanguageKind {
    /// Every supported language, in a stable order.
    pub const ALL: [LanguageKind; 7] = [
        LanguageKind::TypeScript,
        LanguageKind::JavaScript,
        LanguageKind::Rust,
        LanguageKind::Python,
        LanguageKind::Go,
        LanguageKind::Json,
        LanguageKind::Css,
    ];

    /// File extensions (without the dot) owned by this language.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            LanguageKind::TypeScript => &["ts", "tsx", "mts", "cts"],
            LanguageKind::JavaScript => &["js", "jsx", "mjs", "cjs"],
            LanguageKind::Rust => &["rs"],
            LanguageKind::Python => &["py", "pyi"],
            LanguageKind::Go => &["go"],
            LanguageKind::Json => &["json"],
            LanguageKind::Css => &["css", "scss", "less"],
        }
    }

    /// Returns true if this language kind matches a given file extension.
    pub fn matches_extension(&self, ext: &str) -> bool {
        self.extensions().contains(&ext)
    }

    /// Look up the language owning `ext`.
    pub fn from_extension(ext: &str) -> Option<LanguageKind> {
        Self::ALL.into_iter().find(|lang| lang.matches_extension(ext))
    }

    /// Look up the language of a file path by its extension.
    pub fn from_path(path: &Path) -> Option<LanguageKind> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Stable lowercase identifier, used in cache keys and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageKind::TypeScript => "typescript",
            LanguageKind::JavaScript => "javascript",
            LanguageKind::Rust => "rust",
            LanguageKind::Python => "python",
            LanguageKind::Go => "go",
            LanguageKind::Json => "json",
            LanguageKind::Css => "css",
        }
    }

    /// True for languages whose comments use `//` and `/* */`.
    pub fn has_c_style_comments(&self) -> bool {
        matches!(
            self,
            LanguageKind::TypeScript
                | LanguageKind::JavaScript
                | LanguageKind::Rust
                | LanguageKind::Go
                | LanguageKind::Css
        )
    }

    /// Parse a config or CLI string into a `LanguageKind`. Case-insensitive.
    ///
    /// Accepts the identifier returned by [`as_str`](Self::as_str) and the
    /// common short forms ("ts", "js", "rs", "py", "scss", ...).
    pub fn from_str_loose(s: &str) -> Option<LanguageKind> {
        match s.to_lowercase().as_str() {
            "typescript" | "ts" | "tsx" => Some(LanguageKind::TypeScript),
            "javascript" | "js" | "jsx" => Some(LanguageKind::JavaScript),
            "rust" | "rs" => Some(LanguageKind::Rust),
            "python" | "py" => Some(LanguageKind::Python),
            "go" | "golang" => Some(LanguageKind::Go),
            "json" => Some(LanguageKind::Json),
            "css" | "scss" | "less" => Some(LanguageKind::Css),
            _ => None,
        }
    }
}

impl std::fmt::Display for LanguageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_matches_extension() {
        assert!(LanguageKind::TypeScript.matches_extension("ts"));
        assert!(LanguageKind::TypeScript.matches_extension("tsx"));
        assert!(!LanguageKind::TypeScript.matches_extension("js"));

        assert!(LanguageKind::JavaScript.matches_extension("mjs"));
        assert!(!LanguageKind::JavaScript.matches_extension("ts"));

        assert!(LanguageKind::Rust.matches_extension("rs"));
        assert!(LanguageKind::Python.matches_extension("py"));
        assert!(LanguageKind::Css.matches_extension("scss"));
        assert!(!LanguageKind::Json.matches_extension("yaml"));
    }

    #[test]
    fn test_from_path() {
        assert_eq!(
            LanguageKind::from_path(&PathBuf::from("src/app.tsx")),
            Some(LanguageKind::TypeScript)
        );
        assert_eq!(
            LanguageKind::from_path(&PathBuf::from("config.json")),
            Some(LanguageKind::Json)
        );
        assert_eq!(LanguageKind::from_path(&PathBuf::from("README.md")), None);
        assert_eq!(LanguageKind::from_path(&PathBuf::from("Makefile")), None);
    }

    #[test]
    fn test_from_str_loose() {
        assert_eq!(
            LanguageKind::from_str_loose("TypeScript"),
            Some(LanguageKind::TypeScript)
        );
        assert_eq!(LanguageKind::from_str_loose("RS"), Some(LanguageKind::Rust));
        assert_eq!(LanguageKind::from_str_loose("py"), Some(LanguageKind::Python));
        assert_eq!(LanguageKind::from_str_loose("cobol"), None);
        assert_eq!(LanguageKind::from_str_loose(""), None);
    }

    #[test]
    fn test_as_str_round_trips_through_loose_parse() {
        for lang in LanguageKind::ALL {
            assert_eq!(LanguageKind::from_str_loose(lang.as_str()), Some(lang));
        }
    }
}
