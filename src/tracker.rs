//! Project dependency tracking: graph building, impact closure, cycle
//! detection and invalidation scoring.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use petgraph::Direction;
use petgraph::stable_graph::NodeIndex;
use rayon::prelude::*;
use serde::Serialize;

use crate::deps::ExtractorRegistry;
use crate::graph::DependencyGraph;
use crate::graph::edge::DependencyEdge;
use crate::graph::node::FileRole;
use crate::resolver::ProjectResolver;

/// A tracker shared between the batch engine, the watcher pipeline and the
/// CLI. Every graph mutation goes through the write lock, so readers never see
/// a forward edge without its reverse counterpart.
pub type SharedTracker = Arc<RwLock<DependencyTracker>>;

/// Summary counts for `getStats`-style reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub files: usize,
    pub edges: usize,
    pub main_edges: usize,
    pub test_edges: usize,
    pub unresolved: usize,
    pub cycles: usize,
}

/// Builds and maintains the dependency graph of one project.
#[derive(Debug)]
pub struct DependencyTracker {
    resolver: ProjectResolver,
    extractors: ExtractorRegistry,
    graph: DependencyGraph,
    cycles: Vec<Vec<PathBuf>>,
}

impl DependencyTracker {
    /// A tracker for `project_root` using the built-in extractors.
    pub fn new(project_root: &Path) -> Self {
        Self::with_extractors(project_root, ExtractorRegistry::default())
    }

    pub fn with_extractors(project_root: &Path, extractors: ExtractorRegistry) -> Self {
        Self {
            resolver: ProjectResolver::new(project_root),
            extractors,
            graph: DependencyGraph::new(),
            cycles: Vec::new(),
        }
    }

    /// Wrap in the shared handle used by the rest of the pipeline.
    pub fn into_shared(self) -> SharedTracker {
        Arc::new(RwLock::new(self))
    }

    /// Canonical project root.
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Project-relative form of `path`. Relative paths are returned unchanged.
    pub fn relative_path(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            self.resolver.to_relative(path)
        } else {
            Some(path.to_path_buf())
        }
    }

    /// Reset all graph state and rebuild it from `files`.
    ///
    /// Extraction runs in parallel; a file that cannot be read still gets a
    /// node but contributes no edges. Cycle detection runs once at the end.
    pub fn build_dependency_graph(&mut self, files: &[PathBuf]) -> TrackerStats {
        self.resolver.refresh();
        self.graph.clear();
        self.cycles.clear();

        let rel_files: Vec<PathBuf> = files.iter().filter_map(|f| self.relative_path(f)).collect();

        let resolver = &self.resolver;
        let extractors = &self.extractors;
        let extracted: Vec<(PathBuf, Vec<DependencyEdge>)> = rel_files
            .par_iter()
            .map(|rel| {
                let edges = match std::fs::read_to_string(resolver.absolute(rel)) {
                    Ok(source) => extractors.extract_dependencies(resolver, rel, &source),
                    Err(err) => {
                        tracing::debug!(path = %rel.display(), %err, "skipping unreadable file");
                        Vec::new()
                    }
                };
                (rel.clone(), edges)
            })
            .collect();

        for rel in &rel_files {
            self.graph.add_file(rel);
        }
        for (rel, edges) in extracted {
            self.graph.set_dependencies(&rel, edges);
        }
        self.detect_cycles();

        let stats = self.stats();
        tracing::info!(
            files = stats.files,
            edges = stats.edges,
            unresolved = stats.unresolved,
            cycles = stats.cycles,
            "dependency graph built"
        );
        stats
    }

    /// Re-extract the dependencies of one file.
    ///
    /// With `content = None` the file is read from disk; a file that no longer
    /// exists is removed instead. Old forward edges are dropped before the new
    /// ones are added. A file new to the graph also gets linked from files whose
    /// imports of it were unresolved so far.
    pub fn update_file(&mut self, path: &Path, content: Option<&str>) {
        let Some(rel) = self.relative_path(path) else {
            return;
        };
        self.resolver.refresh();
        let owned;
        let source = match content {
            Some(c) => c,
            None => match std::fs::read_to_string(self.resolver.absolute(&rel)) {
                Ok(c) => {
                    owned = c;
                    owned.as_str()
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    self.remove_file(&rel);
                    return;
                }
                Err(err) => {
                    tracing::warn!(path = %rel.display(), %err, "cannot read changed file");
                    return;
                }
            },
        };
        let is_new = !self.graph.contains(&rel);
        let edges = self.extractors.extract_dependencies(&self.resolver, &rel, source);
        self.graph.set_dependencies(&rel, edges);
        if is_new {
            self.relink_unresolved(&rel);
        }
    }

    /// Re-extract every file whose unresolved imports may point at `target`.
    fn relink_unresolved(&mut self, target: &Path) {
        for referrer in self.graph.unresolved_referrers(target) {
            let source = match std::fs::read_to_string(self.resolver.absolute(&referrer)) {
                Ok(source) => source,
                Err(err) => {
                    tracing::debug!(path = %referrer.display(), %err, "cannot re-read referrer");
                    continue;
                }
            };
            let edges = self.extractors.extract_dependencies(&self.resolver, &referrer, &source);
            self.graph.set_dependencies(&referrer, edges);
            tracing::debug!(
                path = %referrer.display(),
                target = %target.display(),
                "relinked unresolved imports"
            );
        }
    }

    /// Drop a file and every edge touching it. Returns `true` if it was tracked.
    pub fn remove_file(&mut self, path: &Path) -> bool {
        match self.relative_path(path) {
            Some(rel) => self.graph.remove_file(&rel),
            None => false,
        }
    }

    /// Resolved forward edges of `path`.
    pub fn dependencies_of(&self, path: &Path) -> Vec<DependencyEdge> {
        self.graph.dependencies(path).into_iter().cloned().collect()
    }

    /// Direct dependents of `path`.
    pub fn dependents_of(&self, path: &Path) -> Vec<PathBuf> {
        self.graph.dependents(path)
    }

    /// Reflexive-transitive closure of `changed` over the reverse graph, sorted.
    ///
    /// Changed files are always part of the result, tracked or not.
    pub fn get_impacted_files(&self, changed: &[PathBuf]) -> Vec<PathBuf> {
        let mut impacted: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        let mut visited: HashSet<NodeIndex> = HashSet::new();

        for path in changed {
            let Some(rel) = self.relative_path(path) else {
                continue;
            };
            if let Some(&idx) = self.graph.file_index.get(&rel)
                && visited.insert(idx)
            {
                queue.push_back(idx);
            }
            impacted.insert(rel);
        }

        while let Some(current) = queue.pop_front() {
            for dependent in self.graph.graph.neighbors_directed(current, Direction::Incoming) {
                if visited.insert(dependent) {
                    impacted.insert(self.graph.graph[dependent].path.clone());
                    queue.push_back(dependent);
                }
            }
        }

        let mut out: Vec<PathBuf> = impacted.into_iter().collect();
        out.sort();
        out
    }

    /// Size of the impact closure of `changed`, used to decide size-based flushes.
    pub fn impact_preview(&self, changed: &[PathBuf]) -> usize {
        self.get_impacted_files(changed).len()
    }

    /// Invalidation priority of `path` in `[1, 10]`.
    ///
    /// Combines transitive dependents, direct dependencies, reverse depth and
    /// whether the file is main code. Only used for ordering and telemetry.
    pub fn calculate_impact_score(&self, path: &Path) -> u8 {
        let Some(&start) = self.graph.file_index.get(path) else {
            return 1;
        };

        let mut depths: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);
        let mut queue = VecDeque::from([start]);
        let mut max_depth = 0;
        while let Some(current) = queue.pop_front() {
            let depth = depths[&current];
            max_depth = max_depth.max(depth);
            for dependent in self.graph.graph.neighbors_directed(current, Direction::Incoming) {
                if !depths.contains_key(&dependent) {
                    depths.insert(dependent, depth + 1);
                    queue.push_back(dependent);
                }
            }
        }

        let dependents = depths.len() - 1;
        let dependencies = self
            .graph
            .graph
            .neighbors_directed(start, Direction::Outgoing)
            .count();
        let main_bonus = usize::from(self.graph.graph[start].role == FileRole::Main);

        let score = 1 + dependents.min(4) + dependencies.min(4) / 2 + max_depth.min(2) + main_bonus;
        score.clamp(1, 10) as u8
    }

    /// Recompute and store the dependency cycles of the current graph.
    pub fn detect_cycles(&mut self) -> &[Vec<PathBuf>] {
        self.cycles = self.find_cycles();
        if !self.cycles.is_empty() {
            tracing::debug!(count = self.cycles.len(), "dependency cycles detected");
        }
        &self.cycles
    }

    /// Cycles found by the last [`detect_cycles`](Self::detect_cycles) run.
    pub fn cycles(&self) -> &[Vec<PathBuf>] {
        &self.cycles
    }

    /// Depth-first search with an explicit stack. A back edge to a node still
    /// on the stack records the stack slice as one cycle; each cycle is stored
    /// once, rotated so its smallest path comes first.
    pub fn find_cycles(&self) -> Vec<Vec<PathBuf>> {
        const UNVISITED: u8 = 0;
        const ON_STACK: u8 = 1;
        const DONE: u8 = 2;

        let graph = &self.graph.graph;
        let mut starts: Vec<NodeIndex> = graph.node_indices().collect();
        starts.sort_by(|a, b| graph[*a].path.cmp(&graph[*b].path));

        let sorted_successors = |idx: NodeIndex| {
            let mut next: Vec<NodeIndex> = graph.neighbors_directed(idx, Direction::Outgoing).collect();
            next.sort_by(|a, b| graph[*a].path.cmp(&graph[*b].path));
            next.dedup();
            next
        };

        let mut state: HashMap<NodeIndex, u8> = HashMap::new();
        let mut seen: HashSet<Vec<PathBuf>> = HashSet::new();
        let mut cycles = Vec::new();

        for start in starts {
            if state.get(&start).copied().unwrap_or(UNVISITED) != UNVISITED {
                continue;
            }
            // (node, successors, next successor to visit)
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            let mut path_pos: HashMap<NodeIndex, usize> = HashMap::new();

            state.insert(start, ON_STACK);
            path_pos.insert(start, 0);
            stack.push((start, sorted_successors(start), 0));

            while let Some(frame) = stack.last_mut() {
                if frame.2 >= frame.1.len() {
                    let done = frame.0;
                    stack.pop();
                    path_pos.remove(&done);
                    state.insert(done, DONE);
                    continue;
                }
                let next = frame.1[frame.2];
                frame.2 += 1;

                match state.get(&next).copied().unwrap_or(UNVISITED) {
                    UNVISITED => {
                        state.insert(next, ON_STACK);
                        path_pos.insert(next, stack.len());
                        let successors = sorted_successors(next);
                        stack.push((next, successors, 0));
                    }
                    ON_STACK => {
                        let from = path_pos[&next];
                        let cycle: Vec<PathBuf> = stack[from..]
                            .iter()
                            .map(|(idx, _, _)| graph[*idx].path.clone())
                            .collect();
                        let canonical = canonical_rotation(cycle);
                        if seen.insert(canonical.clone()) {
                            cycles.push(canonical);
                        }
                    }
                    _ => {}
                }
            }
        }

        cycles.sort();
        cycles
    }

    pub fn stats(&self) -> TrackerStats {
        let (main_edges, test_edges) = self.graph.edge_counts_by_role();
        TrackerStats {
            files: self.graph.file_count(),
            edges: self.graph.edge_count(),
            main_edges,
            test_edges,
            unresolved: self.graph.unresolved_count(),
            cycles: self.cycles.len(),
        }
    }
}

/// Rotate a cycle so that its smallest path is first.
fn canonical_rotation(mut cycle: Vec<PathBuf>) -> Vec<PathBuf> {
    if let Some(min_pos) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(min_pos);
    }
    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project(files: &[(&str, &str)]) -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (path, content) in files {
            let abs = dir.path().join(path);
            if let Some(parent) = abs.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&abs, content).unwrap();
            paths.push(PathBuf::from(path));
        }
        (dir, paths)
    }

    fn chain() -> (tempfile::TempDir, DependencyTracker) {
        let (dir, files) = project(&[
            ("main.js", "import { util } from './util';\n"),
            ("util.js", "import cfg from './config.json';\nexport const util = cfg;\n"),
            ("config.json", "{\"debug\": true}"),
            ("other.js", "export const x = 1;\n"),
        ]);
        let mut tracker = DependencyTracker::new(dir.path());
        tracker.build_dependency_graph(&files);
        (dir, tracker)
    }

    #[test]
    fn test_impact_closure_is_reflexive_and_transitive() {
        let (_dir, tracker) = chain();
        let impacted = tracker.get_impacted_files(&[PathBuf::from("config.json")]);
        assert_eq!(
            impacted,
            vec![
                PathBuf::from("config.json"),
                PathBuf::from("main.js"),
                PathBuf::from("util.js")
            ]
        );
        assert_eq!(
            tracker.get_impacted_files(&[PathBuf::from("other.js")]),
            vec![PathBuf::from("other.js")]
        );
        assert_eq!(tracker.impact_preview(&[PathBuf::from("util.js")]), 2);
    }

    #[test]
    fn test_untracked_changed_file_is_still_impacted() {
        let (_dir, tracker) = chain();
        assert_eq!(
            tracker.get_impacted_files(&[PathBuf::from("new.js")]),
            vec![PathBuf::from("new.js")]
        );
    }

    #[test]
    fn test_absolute_paths_are_accepted() {
        let (dir, tracker) = chain();
        let abs = fs::canonicalize(dir.path()).unwrap().join("util.js");
        let impacted = tracker.get_impacted_files(&[abs]);
        assert_eq!(impacted.len(), 2, "util.js and main.js: {impacted:?}");
    }

    #[test]
    fn test_cycle_detected_once_and_scores_bounded() {
        let (dir, files) = project(&[
            ("a.js", "import './b';\n"),
            ("b.js", "import './a';\n"),
        ]);
        let mut tracker = DependencyTracker::new(dir.path());
        let stats = tracker.build_dependency_graph(&files);

        assert_eq!(stats.cycles, 1);
        assert_eq!(
            tracker.cycles(),
            &[vec![PathBuf::from("a.js"), PathBuf::from("b.js")]]
        );
        for file in ["a.js", "b.js"] {
            let score = tracker.calculate_impact_score(Path::new(file));
            assert!((1..=10).contains(&score), "{file} scored {score}");
        }
        let impacted = tracker.get_impacted_files(&[PathBuf::from("a.js")]);
        assert_eq!(impacted, vec![PathBuf::from("a.js"), PathBuf::from("b.js")]);
    }

    #[test]
    fn test_three_node_cycle_reported_once() {
        let (dir, files) = project(&[
            ("c.js", "import './a';\n"),
            ("a.js", "import './b';\n"),
            ("b.js", "import './c';\n"),
        ]);
        let mut tracker = DependencyTracker::new(dir.path());
        tracker.build_dependency_graph(&files);
        assert_eq!(
            tracker.cycles(),
            &[vec![
                PathBuf::from("a.js"),
                PathBuf::from("b.js"),
                PathBuf::from("c.js")
            ]]
        );
    }

    #[test]
    fn test_impact_score_ranks_shared_files_higher() {
        let (_dir, tracker) = chain();
        let config = tracker.calculate_impact_score(Path::new("config.json"));
        let main = tracker.calculate_impact_score(Path::new("main.js"));
        assert!(config > main, "config.json ({config}) should outrank main.js ({main})");
        assert_eq!(tracker.calculate_impact_score(Path::new("missing.js")), 1);
    }

    #[test]
    fn test_update_file_replaces_edges() {
        let (_dir, mut tracker) = chain();
        tracker.update_file(Path::new("main.js"), Some("import './other';\n"));
        assert!(tracker.dependents_of(Path::new("util.js")).is_empty());
        assert_eq!(
            tracker.dependents_of(Path::new("other.js")),
            vec![PathBuf::from("main.js")]
        );
        assert!(tracker.graph().is_consistent());
    }

    #[test]
    fn test_update_file_of_deleted_file_removes_it() {
        let (dir, mut tracker) = chain();
        fs::remove_file(dir.path().join("util.js")).unwrap();
        tracker.update_file(Path::new("util.js"), None);
        assert!(!tracker.graph().contains(Path::new("util.js")));
        assert_eq!(
            tracker.get_impacted_files(&[PathBuf::from("config.json")]),
            vec![PathBuf::from("config.json")]
        );
    }

    #[test]
    fn test_file_created_after_build_links_its_importers() {
        let (dir, files) = project(&[("main.js", "import { f } from './fresh';\n")]);
        let mut tracker = DependencyTracker::new(dir.path());
        tracker.build_dependency_graph(&files);
        assert!(tracker.dependents_of(Path::new("fresh.js")).is_empty());

        fs::write(dir.path().join("fresh.js"), "export const f = 1;\n").unwrap();
        tracker.update_file(Path::new("fresh.js"), None);
        assert_eq!(
            tracker.dependents_of(Path::new("fresh.js")),
            vec![PathBuf::from("main.js")]
        );
        assert!(tracker.graph().is_consistent());

        // A full rebuild on the same tracker sees the new file as well.
        let stats = tracker.build_dependency_graph(&[
            PathBuf::from("main.js"),
            PathBuf::from("fresh.js"),
        ]);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.unresolved, 0);
    }

    #[test]
    fn test_deleted_then_recreated_file_regains_dependents() {
        let (dir, mut tracker) = chain();
        let util = dir.path().join("util.js");
        let content = fs::read_to_string(&util).unwrap();

        fs::remove_file(&util).unwrap();
        tracker.update_file(Path::new("util.js"), None);
        assert!(!tracker.graph().contains(Path::new("util.js")));

        fs::write(&util, content).unwrap();
        tracker.update_file(Path::new("util.js"), None);
        assert_eq!(
            tracker.dependents_of(Path::new("util.js")),
            vec![PathBuf::from("main.js")]
        );
        assert_eq!(
            tracker.get_impacted_files(&[PathBuf::from("config.json")]),
            vec![
                PathBuf::from("config.json"),
                PathBuf::from("main.js"),
                PathBuf::from("util.js")
            ]
        );
        assert!(tracker.graph().is_consistent());
    }

    #[test]
    fn test_stats_and_unresolved() {
        let (dir, files) = project(&[
            ("src/app.ts", "import React from 'react';\nimport { f } from './lib';\n"),
            ("src/lib.ts", "export const f = 1;\n"),
            ("src/lib.test.ts", "import { f } from './lib';\n"),
        ]);
        let mut tracker = DependencyTracker::new(dir.path());
        let stats = tracker.build_dependency_graph(&files);
        assert_eq!(stats.files, 3);
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.main_edges, 1);
        assert_eq!(stats.test_edges, 1);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.cycles, 0);
    }

    #[test]
    fn test_rebuild_resets_state() {
        let (_dir, mut tracker) = chain();
        let stats = tracker.build_dependency_graph(&[PathBuf::from("other.js")]);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.edges, 0);
    }
}
