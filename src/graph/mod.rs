pub mod edge;
pub mod node;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Directed;

use edge::DependencyEdge;
use node::{FileNode, FileRole};

/// The per-project file dependency graph.
///
/// Forward edges run from a file to each file it depends on. The reverse index
/// (`target -> dependents`) is the incoming adjacency of the same `StableGraph`:
/// petgraph links both directions in a single `add_edge`/`remove_edge` call, so
/// the reverse map is always exactly the inverse of the forward map.
///
/// The main/test split is carried on the nodes ([`FileRole`]); forward edges of
/// test files form the test sub-graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// The underlying directed graph. Edge weights are the resolved dependencies.
    pub graph: StableGraph<FileNode, DependencyEdge, Directed>,
    /// Maps project-relative paths to their node indices for O(1) lookup.
    pub file_index: HashMap<PathBuf, NodeIndex>,
}

impl DependencyGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node and edge.
    pub fn clear(&mut self) {
        self.graph.clear();
        self.file_index.clear();
    }

    /// Add a file node. If the file has already been added, returns the existing index.
    pub fn add_file(&mut self, path: &Path) -> NodeIndex {
        if let Some(&existing) = self.file_index.get(path) {
            return existing;
        }
        let idx = self.graph.add_node(FileNode::new(path.to_path_buf()));
        self.file_index.insert(path.to_path_buf(), idx);
        idx
    }

    /// Replace the outgoing dependencies of `path`.
    ///
    /// All previous forward edges of the file are removed before the new ones
    /// are added, in one `&mut self` step. Resolved targets missing from the
    /// graph are added as nodes; unresolved edges are kept on the node only.
    pub fn set_dependencies(&mut self, path: &Path, edges: Vec<DependencyEdge>) {
        let from_idx = self.add_file(path);

        let old: Vec<_> = self
            .graph
            .edges_directed(from_idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge_id in old {
            self.graph.remove_edge(edge_id);
        }

        let mut unresolved = Vec::new();
        for edge in edges {
            match edge.to.clone() {
                // Self-references carry no invalidation information.
                Some(target) if target.as_path() == path => {}
                Some(target) => {
                    let to_idx = self.add_file(&target);
                    let duplicate = self
                        .graph
                        .edges_directed(from_idx, Direction::Outgoing)
                        .any(|e| e.target() == to_idx && e.weight().kind == edge.kind);
                    if !duplicate {
                        self.graph.add_edge(from_idx, to_idx, edge);
                    }
                }
                None => unresolved.push(edge),
            }
        }
        self.graph[from_idx].unresolved = unresolved;
    }

    /// Remove a file and every edge touching it. Returns `true` if it was present.
    ///
    /// Edges of files importing `path` are demoted to unresolved references on
    /// the importer, so they can be linked again when the file comes back.
    pub fn remove_file(&mut self, path: &Path) -> bool {
        let Some(idx) = self.file_index.remove(path) else {
            return false;
        };
        let incoming: Vec<(NodeIndex, DependencyEdge)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.source(), e.weight().clone()))
            .collect();
        for (source, mut edge) in incoming {
            edge.to = None;
            self.graph[source].unresolved.push(edge);
        }
        self.graph.remove_node(idx);
        true
    }

    /// Files holding an unresolved reference that may now resolve to `target`.
    ///
    /// Matching is by name only (file stem, stem without a leading `_`, parent
    /// directory), so the result over-approximates; callers re-extract each
    /// candidate to get the exact edges.
    pub fn unresolved_referrers(&self, target: &Path) -> Vec<PathBuf> {
        let keys = reference_keys(target);
        if keys.is_empty() {
            return Vec::new();
        }
        let mut referrers: Vec<PathBuf> = self
            .graph
            .node_indices()
            .map(|i| &self.graph[i])
            .filter(|node| node.path != target)
            .filter(|node| {
                node.unresolved
                    .iter()
                    .any(|edge| keys.iter().any(|key| edge.raw.contains(key.as_str())))
            })
            .map(|node| node.path.clone())
            .collect();
        referrers.sort();
        referrers
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.file_index.contains_key(path)
    }

    pub fn node(&self, path: &Path) -> Option<&FileNode> {
        self.file_index.get(path).map(|&idx| &self.graph[idx])
    }

    /// Resolved forward edges of `path`.
    pub fn dependencies(&self, path: &Path) -> Vec<&DependencyEdge> {
        let Some(&idx) = self.file_index.get(path) else {
            return Vec::new();
        };
        let mut deps: Vec<&DependencyEdge> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.weight())
            .collect();
        deps.sort_by(|a, b| a.to.cmp(&b.to).then(a.line.cmp(&b.line)));
        deps
    }

    /// Files that directly depend on `path`, sorted.
    pub fn dependents(&self, path: &Path) -> Vec<PathBuf> {
        let Some(&idx) = self.file_index.get(path) else {
            return Vec::new();
        };
        let mut out: Vec<PathBuf> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| self.graph[n].path.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Number of file nodes in the graph.
    pub fn file_count(&self) -> usize {
        self.file_index.len()
    }

    /// Number of resolved dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Resolved edges split by the role of the depending file: `(main, test)`.
    pub fn edge_counts_by_role(&self) -> (usize, usize) {
        let mut main = 0;
        let mut test = 0;
        for edge in self.graph.edge_references() {
            match self.graph[edge.source()].role {
                FileRole::Main => main += 1,
                FileRole::Test => test += 1,
            }
        }
        (main, test)
    }

    /// Total unresolved references across all files.
    pub fn unresolved_count(&self) -> usize {
        self.graph
            .node_indices()
            .map(|i| self.graph[i].unresolved.len())
            .sum()
    }

    /// All file paths, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.file_index.keys().cloned().collect();
        files.sort();
        files
    }

    /// Check that every edge endpoint is indexed and every indexed node is live.
    pub fn is_consistent(&self) -> bool {
        let indexed_ok = self
            .file_index
            .iter()
            .all(|(path, &idx)| self.graph.node_weight(idx).is_some_and(|n| &n.path == path));
        let edges_ok = self.graph.edge_references().all(|e| {
            let src = &self.graph[e.source()].path;
            let dst = &self.graph[e.target()].path;
            e.weight().from == *src
                && e.weight().to.as_deref() == Some(dst.as_path())
                && self.file_index.contains_key(src)
                && self.file_index.contains_key(dst)
        });
        indexed_ok && edges_ok && self.file_index.len() == self.graph.node_count()
    }
}

/// Names a reference to `target` can be spelled with: `util` for `util.js`,
/// `colors` for `_colors.scss`, `api` for `api/index.ts` or `api/mod.rs`.
fn reference_keys(target: &Path) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(stem) = target.file_stem().and_then(|s| s.to_str()) {
        keys.push(stem.to_owned());
        let bare = stem.trim_start_matches('_');
        if bare != stem {
            keys.push(bare.to_owned());
        }
    }
    if let Some(dir) = target
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
    {
        keys.push(dir.to_owned());
    }
    keys.retain(|k| !k.is_empty());
    keys
}
