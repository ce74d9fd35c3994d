use std::path::{Component, Path, PathBuf};

use oxc_resolver::{ResolveOptions, Resolver, TsconfigOptions, TsconfigReferences};

/// Resolves dependency specifiers to files inside one project root.
///
/// Anything that resolves outside the root, or into `node_modules`, is treated
/// as external and reported as unresolved.
pub struct ProjectResolver {
    root: PathBuf,
    js: Resolver,
    go_module: Option<String>,
}

impl std::fmt::Debug for ProjectResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectResolver")
            .field("root", &self.root)
            .field("go_module", &self.go_module)
            .finish_non_exhaustive()
    }
}

impl ProjectResolver {
    /// Build a resolver for `project_root`. The root is canonicalized so paths
    /// returned by `oxc_resolver` (which follows symlinks) strip cleanly.
    pub fn new(project_root: &Path) -> Self {
        let root = std::fs::canonicalize(project_root).unwrap_or_else(|_| project_root.to_path_buf());
        let js = build_js_resolver(&root);
        let go_module = read_go_module(&root);
        Self { root, js, go_module }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Forget everything learned from the filesystem so far.
    ///
    /// `oxc_resolver` caches directory listings and misses, so a file created
    /// after the first lookup would stay unresolvable. A fresh resolver (and a
    /// re-read `go.mod`) is built instead.
    pub fn refresh(&mut self) {
        self.js = build_js_resolver(&self.root);
        self.go_module = read_go_module(&self.root);
    }

    /// The `module` path declared in `go.mod`, if any.
    pub fn go_module(&self) -> Option<&str> {
        self.go_module.as_deref()
    }

    /// Absolute path for a project-relative path.
    pub fn absolute(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    /// Project-relative form of `abs`, or `None` when it lies outside the
    /// project or inside `node_modules`.
    pub fn to_relative(&self, abs: &Path) -> Option<PathBuf> {
        let rel = abs.strip_prefix(&self.root).ok()?;
        if rel.components().any(|c| c.as_os_str() == "node_modules") {
            return None;
        }
        Some(rel.to_path_buf())
    }

    /// Resolve a JS/TS module specifier written in `from` (project-relative).
    ///
    /// Bare package names, Node builtins and anything landing in `node_modules`
    /// are external.
    pub fn resolve_js(&self, from: &Path, specifier: &str) -> Option<PathBuf> {
        let dir = self.absolute(from).parent()?.to_path_buf();
        match self.js.resolve(&dir, specifier) {
            Ok(resolution) => self.to_relative(&resolution.into_path_buf()),
            Err(oxc_resolver::ResolveError::Builtin { .. }) => None,
            Err(_) => None,
        }
    }

    /// Return the first candidate (absolute or relative to the root) that is
    /// an existing file inside the project.
    pub fn first_existing<I>(&self, candidates: I) -> Option<PathBuf>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        candidates.into_iter().find_map(|candidate| {
            let abs = if candidate.is_absolute() {
                candidate
            } else {
                self.root.join(candidate)
            };
            let abs = lexical_normalize(&abs);
            if abs.is_file() {
                self.to_relative(&abs)
            } else {
                None
            }
        })
    }

    /// Every `.go` file (excluding tests) directly inside the project-relative `dir`.
    pub fn go_package_files(&self, dir: &Path) -> Vec<PathBuf> {
        let abs = self.root.join(dir);
        let mut files: Vec<PathBuf> = match std::fs::read_dir(&abs) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension().is_some_and(|e| e == "go")
                        && !p
                            .file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.ends_with("_test.go"))
                })
                .filter_map(|p| self.to_relative(&p))
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }
}

/// Build an `oxc_resolver::Resolver` configured for TypeScript/JavaScript projects.
///
/// - TypeScript extensions are tried first (`.ts`, `.tsx`, `.mts`).
/// - `.js` extension aliases map to `.ts`/`.tsx`/`.js` so projects that write
///   `import './foo.js'` in TypeScript source resolve correctly.
/// - If `tsconfig.json` exists at the root, path aliases and project references
///   are resolved automatically via `TsconfigReferences::Auto`.
fn build_js_resolver(project_root: &Path) -> Resolver {
    let tsconfig_path = project_root.join("tsconfig.json");
    let tsconfig = if tsconfig_path.exists() {
        Some(TsconfigOptions {
            config_file: tsconfig_path,
            references: TsconfigReferences::Auto,
        })
    } else {
        None
    };

    Resolver::new(ResolveOptions {
        extensions: vec![
            ".ts".into(),
            ".tsx".into(),
            ".mts".into(),
            ".js".into(),
            ".jsx".into(),
            ".mjs".into(),
            ".cjs".into(),
            ".json".into(),
        ],
        extension_alias: vec![(
            ".js".into(),
            vec![".ts".into(), ".tsx".into(), ".js".into()],
        )],
        tsconfig,
        condition_names: vec!["node".into(), "import".into()],
        builtin_modules: true,
        ..ResolveOptions::default()
    })
}

/// Read the module path from `go.mod`, if present.
fn read_go_module(root: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(root.join("go.mod")).ok()?;
    contents.lines().find_map(|line| {
        line.trim()
            .strip_prefix("module")
            .map(|rest| rest.trim().trim_matches('"').to_owned())
            .filter(|m| !m.is_empty())
    })
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
