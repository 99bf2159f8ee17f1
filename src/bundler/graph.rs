//! Module graph data structures
//!
//! Module identity is the canonical absolute path; a module exists in the
//! graph at most once regardless of how many importers reference it. Edges
//! are ordered by appearance in the importer's source and tagged static or
//! deferred.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Unique identifier for a module within one build's graph
pub type ModuleId = usize;

/// How a dependency is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepKind {
    /// Bundled eagerly into the importer's chunk (subject to extraction)
    Static,
    /// Loaded on demand; the target seeds its own chunk
    Deferred,
}

/// A dependency declared in a module's source, before resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRequest {
    /// The import specifier as written
    pub specifier: String,

    /// Static or deferred
    pub kind: DepKind,

    /// Explicit chunk name declared at a deferred import site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_name: Option<String>,
}

impl DependencyRequest {
    pub fn static_import(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            kind: DepKind::Static,
            chunk_name: None,
        }
    }

    pub fn deferred_import(specifier: impl Into<String>, chunk_name: Option<String>) -> Self {
        Self {
            specifier: specifier.into(),
            kind: DepKind::Deferred,
            chunk_name,
        }
    }
}

/// A module in the dependency graph
#[derive(Debug, Clone)]
pub struct Module {
    /// Canonical absolute path; the module's identity
    pub path: PathBuf,

    /// Raw source as read from disk
    pub source: String,

    /// Output of the transform pipeline
    pub transformed: String,

    /// Hash of the raw source
    pub source_hash: String,

    /// Whether this is an entry point
    pub is_entry: bool,

    /// Dependency requests in source order
    pub dependencies: Vec<DependencyRequest>,

    /// Set when a declared dependency failed to resolve or build; chunks
    /// containing a broken module are withheld in best-effort mode
    pub broken: bool,
}

/// A resolved dependency edge
#[derive(Debug, Clone)]
pub struct Edge {
    pub to: ModuleId,
    pub specifier: String,
    pub kind: DepKind,
    pub chunk_name: Option<String>,
}

/// The module dependency graph
#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Modules, indexed by id
    modules: Vec<Module>,

    /// Map from canonical path to module id
    path_to_id: HashMap<PathBuf, ModuleId>,

    /// Outgoing edges per module, in source order
    edges: Vec<Vec<Edge>>,
}

impl ModuleGraph {
    /// Create a new empty module graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module; returns the existing id if the path is already present
    pub fn add_module(&mut self, module: Module) -> ModuleId {
        if let Some(&id) = self.path_to_id.get(&module.path) {
            return id;
        }

        let id = self.modules.len();
        self.path_to_id.insert(module.path.clone(), id);
        self.modules.push(module);
        self.edges.push(Vec::new());
        id
    }

    /// Add a dependency edge
    pub fn add_edge(&mut self, from: ModuleId, edge: Edge) {
        self.edges[from].push(edge);
    }

    /// Get module id from canonical path
    pub fn module_id(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    /// Get a module by id
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id]
    }

    /// Get a mutable reference to a module
    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id]
    }

    /// Outgoing edges of a module, in source order
    pub fn edges(&self, id: ModuleId) -> &[Edge] {
        &self.edges[id]
    }

    /// Total number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules reachable from `start` following static edges only, in BFS
    /// discovery order. Deferred targets are excluded; they belong to the
    /// chunk they defer to.
    pub fn static_reachable(&self, start: ModuleId) -> Vec<ModuleId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();

        queue.push_back(start);
        visited.insert(start);

        while let Some(id) = queue.pop_front() {
            order.push(id);

            for edge in &self.edges[id] {
                if edge.kind == DepKind::Static && visited.insert(edge.to) {
                    queue.push_back(edge.to);
                }
            }
        }

        order
    }

    /// Topological order of `members` over static edges: dependencies precede
    /// dependents, ties broken by the given order. Cycles are legal; a
    /// back-edge is skipped so traversal terminates, and each member appears
    /// exactly once.
    pub fn topo_order(&self, members: &[ModuleId]) -> Vec<ModuleId> {
        let set: HashSet<ModuleId> = members.iter().copied().collect();
        let mut state: HashMap<ModuleId, u8> = HashMap::new();
        let mut order = Vec::with_capacity(members.len());

        for &id in members {
            self.topo_visit(id, &set, &mut state, &mut order);
        }

        order
    }

    fn topo_visit(
        &self,
        id: ModuleId,
        set: &HashSet<ModuleId>,
        state: &mut HashMap<ModuleId, u8>,
        order: &mut Vec<ModuleId>,
    ) {
        match state.get(&id) {
            Some(&2) => return,
            Some(&1) => {
                // Cycle; not an error
                debug!(
                    "cyclic static dependency involving {}",
                    self.modules[id].path.display()
                );
                return;
            }
            _ => {}
        }

        state.insert(id, 1);

        for edge in &self.edges[id] {
            if edge.kind == DepKind::Static && set.contains(&edge.to) {
                self.topo_visit(edge.to, set, state, order);
            }
        }

        state.insert(id, 2);
        order.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(path: &str) -> Module {
        Module {
            path: PathBuf::from(path),
            source: String::new(),
            transformed: String::new(),
            source_hash: String::new(),
            is_entry: false,
            dependencies: Vec::new(),
            broken: false,
        }
    }

    fn static_edge(to: ModuleId) -> Edge {
        Edge {
            to,
            specifier: String::new(),
            kind: DepKind::Static,
            chunk_name: None,
        }
    }

    #[test]
    fn test_add_module_dedupes_by_path() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(module("/app/a.js"));
        let b = graph.add_module(module("/app/a.js"));
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.module_id(Path::new("/app/a.js")), Some(a));
    }

    #[test]
    fn test_static_reachability_stops_at_deferred_edges() {
        let mut graph = ModuleGraph::new();
        let index = graph.add_module(module("/app/index.js"));
        let a = graph.add_module(module("/app/a.js"));
        let b = graph.add_module(module("/app/b.js"));

        graph.add_edge(index, static_edge(a));
        graph.add_edge(
            index,
            Edge {
                to: b,
                specifier: "./b".to_string(),
                kind: DepKind::Deferred,
                chunk_name: None,
            },
        );

        let reachable = graph.static_reachable(index);
        assert_eq!(reachable, vec![index, a]);
    }

    #[test]
    fn test_topo_order_puts_dependencies_first() {
        let mut graph = ModuleGraph::new();
        let index = graph.add_module(module("/app/index.js"));
        let a = graph.add_module(module("/app/a.js"));
        let c = graph.add_module(module("/app/c.js"));

        graph.add_edge(index, static_edge(a));
        graph.add_edge(a, static_edge(c));

        let order = graph.topo_order(&[index, a, c]);
        assert_eq!(order, vec![c, a, index]);
    }

    #[test]
    fn test_topo_order_terminates_on_cycles() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(module("/app/a.js"));
        let b = graph.add_module(module("/app/b.js"));

        graph.add_edge(a, static_edge(b));
        graph.add_edge(b, static_edge(a));

        let order = graph.topo_order(&[a, b]);
        assert_eq!(order.len(), 2);
        assert!(order.contains(&a) && order.contains(&b));
    }
}
