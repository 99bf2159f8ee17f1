//! Chunk graph construction for code splitting
//!
//! Each entry seeds one chunk; each module reached through a deferred edge
//! seeds another. A module claimed by more than one chunk is extracted into a
//! synthetic shared chunk, or into the vendor chunk when the vendor predicate
//! matches its path, so no module is ever duplicated across artifacts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use super::graph::{DepKind, ModuleGraph, ModuleId};
use crate::config::VendorConfig;
use crate::error::BuildError;
use crate::utils;

/// Name of the synthetic chunk holding extracted shared modules
pub const SHARED_CHUNK: &str = "shared";

/// Name of the designated vendor chunk
pub const VENDOR_CHUNK: &str = "vendor";

/// Type of chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Entry point chunk, loaded immediately
    Entry,
    /// Deferred chunk, loaded on demand via dynamic import
    Deferred,
    /// Synthetic chunk holding modules claimed by multiple chunks
    Shared,
    /// Shared modules matching the vendor predicate
    Vendor,
}

/// A chunk is a group of modules emitted as one artifact
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk name, used for the output filename and manifest key
    pub name: String,

    /// Type of chunk
    pub kind: ChunkKind,

    /// Modules in emission order: static dependencies precede dependents
    pub modules: Vec<ModuleId>,

    /// The module executed when the chunk loads (entry and deferred chunks)
    pub entry: Option<ModuleId>,

    /// Names of shared/vendor chunks that must be loaded before this one
    pub depends_on: Vec<String>,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }
}

/// The partitioned module graph
#[derive(Debug)]
pub struct ChunkGraph {
    /// Chunks in deterministic order: entries, then deferred chunks in
    /// discovery order, then vendor and shared
    pub chunks: Vec<Chunk>,

    /// Chunk name for every module that is the target of a deferred edge;
    /// the emitter rewrites deferred import sites to these names
    deferred_names: HashMap<ModuleId, String>,
}

impl ChunkGraph {
    /// Chunk name a deferred import of `target` must request at runtime
    pub fn deferred_chunk_name(&self, target: ModuleId) -> Option<&str> {
        self.deferred_names.get(&target).map(|s| s.as_str())
    }

    /// Look up a chunk by name
    pub fn chunk(&self, name: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.name == name)
    }
}

/// Compiled vendor predicate: glob patterns and/or package specifiers
pub struct VendorPredicate {
    matcher: Option<GlobSet>,
    specifiers: Vec<String>,
}

impl VendorPredicate {
    pub fn from_config(config: &VendorConfig) -> Result<Self, BuildError> {
        let matcher = if config.test.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &config.test {
                let glob = Glob::new(pattern).map_err(|e| {
                    BuildError::Configuration(format!("vendor has invalid glob '{pattern}': {e}"))
                })?;
                builder.add(glob);
            }
            Some(builder.build().map_err(|e| {
                BuildError::Configuration(format!("vendor glob set failed to compile: {e}"))
            })?)
        };

        Ok(Self {
            matcher,
            specifiers: config.specifiers.clone(),
        })
    }

    /// Whether a module's canonical path is vendor code
    pub fn matches(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy().replace('\\', "/");

        if let Some(matcher) = &self.matcher {
            if matcher.is_match(&path_str) {
                return true;
            }
        }

        self.specifiers.iter().any(|spec| {
            path_str.contains(&format!("/node_modules/{spec}/"))
                || path_str.ends_with(&format!("/node_modules/{spec}"))
        })
    }
}

/// Partition the module graph into chunks.
///
/// `entries` are (name, entry module) pairs in declaration order. The walk
/// over each chunk follows static edges only; deferred edges record a chunk
/// boundary instead of pulling the target in.
pub fn split(
    graph: &ModuleGraph,
    entries: &[(String, ModuleId)],
    vendor: &VendorPredicate,
) -> Result<ChunkGraph, BuildError> {
    // Seed one chunk per entry, then one per deferred boundary discovered
    // while walking seeded chunks.
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut chunk_names: HashSet<String> = HashSet::new();
    let mut deferred_names: HashMap<ModuleId, String> = HashMap::new();
    let mut seeded: HashSet<ModuleId> = HashSet::new();

    let mut worklist: VecDeque<(String, ModuleId, ChunkKind)> = VecDeque::new();

    for (name, id) in entries {
        if !chunk_names.insert(name.clone()) {
            return Err(BuildError::Configuration(format!(
                "duplicate chunk name '{name}'"
            )));
        }
        seeded.insert(*id);
        // An entry that is also a deferred target keeps its entry chunk;
        // deferred import sites request it by the entry chunk name.
        deferred_names.entry(*id).or_insert_with(|| name.clone());
        worklist.push_back((name.clone(), *id, ChunkKind::Entry));
    }

    while let Some((name, seed, kind)) = worklist.pop_front() {
        let members = graph.static_reachable(seed);

        // Discover deferred boundaries inside this chunk
        for &member in &members {
            for edge in graph.edges(member) {
                if edge.kind != DepKind::Deferred {
                    continue;
                }

                if let Some(existing) = deferred_names.get(&edge.to) {
                    // Same target deferred from several places shares one chunk
                    if let Some(declared) = &edge.chunk_name {
                        if declared != existing {
                            return Err(BuildError::Configuration(format!(
                                "deferred import of {} declares chunk name '{declared}' but \
                                 '{existing}' is already assigned",
                                graph.module(edge.to).path.display()
                            )));
                        }
                    }
                    continue;
                }

                let target_name = match &edge.chunk_name {
                    Some(declared) => declared.clone(),
                    None => derived_chunk_name(graph, edge.to),
                };

                if !chunk_names.insert(target_name.clone()) {
                    return Err(BuildError::Configuration(format!(
                        "deferred chunk name '{target_name}' collides with an existing chunk"
                    )));
                }

                deferred_names.insert(edge.to, target_name.clone());

                if seeded.insert(edge.to) {
                    worklist.push_back((target_name, edge.to, ChunkKind::Deferred));
                }
            }
        }

        chunks.push(Chunk {
            name,
            kind,
            modules: members,
            entry: Some(seed),
            depends_on: Vec::new(),
        });
    }

    extract_shared(graph, &mut chunks, vendor)?;

    // Emission order within each chunk: static dependencies first
    for chunk in &mut chunks {
        chunk.modules = graph.topo_order(&chunk.modules);
    }

    if cfg!(debug_assertions) {
        let mut seen = HashSet::new();
        for chunk in &chunks {
            for &m in &chunk.modules {
                debug_assert!(seen.insert(m), "module assigned to more than one chunk");
            }
        }
    }

    Ok(ChunkGraph {
        chunks,
        deferred_names,
    })
}

/// Deterministic name for a deferred chunk without an explicit one:
/// file stem plus a short hash of the module's canonical path
fn derived_chunk_name(graph: &ModuleGraph, target: ModuleId) -> String {
    let path = &graph.module(target).path;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "chunk".to_string());
    let digest = utils::short_hash(path.to_string_lossy().as_bytes(), 8);
    format!("{stem}.{digest}")
}

/// Pull modules claimed by more than one chunk into a shared chunk, or the
/// vendor chunk when the vendor predicate matches
fn extract_shared(
    graph: &ModuleGraph,
    chunks: &mut Vec<Chunk>,
    vendor: &VendorPredicate,
) -> Result<(), BuildError> {
    let mut claim_count: HashMap<ModuleId, usize> = HashMap::new();
    for chunk in chunks.iter() {
        for &m in &chunk.modules {
            *claim_count.entry(m).or_insert(0) += 1;
        }
    }

    // First-seen order across chunks keeps extraction deterministic
    let mut vendor_modules: Vec<ModuleId> = Vec::new();
    let mut shared_modules: Vec<ModuleId> = Vec::new();
    let mut extracted: HashSet<ModuleId> = HashSet::new();

    for chunk in chunks.iter() {
        for &m in &chunk.modules {
            if claim_count[&m] < 2 || !extracted.insert(m) {
                continue;
            }
            if vendor.matches(&graph.module(m).path) {
                vendor_modules.push(m);
            } else {
                shared_modules.push(m);
            }
        }
    }

    if extracted.is_empty() {
        return Ok(());
    }

    let vendor_set: HashSet<ModuleId> = vendor_modules.iter().copied().collect();

    for chunk in chunks.iter_mut() {
        let removed: Vec<ModuleId> = chunk
            .modules
            .iter()
            .copied()
            .filter(|m| extracted.contains(m))
            .collect();
        if removed.is_empty() {
            continue;
        }

        chunk.modules.retain(|m| !extracted.contains(m));

        // Load-order dependency replaces the removed modules
        if removed.iter().any(|m| vendor_set.contains(m)) {
            chunk.depends_on.push(VENDOR_CHUNK.to_string());
        }
        if removed.iter().any(|m| !vendor_set.contains(m)) {
            chunk.depends_on.push(SHARED_CHUNK.to_string());
        }
    }

    debug!(
        "Extracted {} shared and {} vendor module(s)",
        shared_modules.len(),
        vendor_modules.len()
    );

    if !vendor_modules.is_empty() {
        ensure_name_free(chunks, VENDOR_CHUNK)?;
        chunks.push(Chunk {
            name: VENDOR_CHUNK.to_string(),
            kind: ChunkKind::Vendor,
            modules: vendor_modules,
            entry: None,
            depends_on: Vec::new(),
        });
    }

    if !shared_modules.is_empty() {
        ensure_name_free(chunks, SHARED_CHUNK)?;
        chunks.push(Chunk {
            name: SHARED_CHUNK.to_string(),
            kind: ChunkKind::Shared,
            modules: shared_modules,
            entry: None,
            depends_on: Vec::new(),
        });
    }

    Ok(())
}

fn ensure_name_free(chunks: &[Chunk], name: &str) -> Result<(), BuildError> {
    if chunks.iter().any(|c| c.name == name) {
        return Err(BuildError::Configuration(format!(
            "chunk name '{name}' is reserved for extracted modules"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::{Edge, Module};
    use std::path::PathBuf;

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

    fn edge(to: ModuleId, kind: DepKind) -> Edge {
        Edge {
            to,
            specifier: String::new(),
            kind,
            chunk_name: None,
        }
    }

    fn no_vendor() -> VendorPredicate {
        VendorPredicate::from_config(&VendorConfig::default()).unwrap()
    }

    /// index -> a (static) -> c (static), index -> b (deferred)
    fn example_graph() -> (ModuleGraph, ModuleId, ModuleId) {
        let mut graph = ModuleGraph::new();
        let index = graph.add_module(module("/app/index.js"));
        let a = graph.add_module(module("/app/a.js"));
        let b = graph.add_module(module("/app/b.js"));
        let c = graph.add_module(module("/app/c.js"));

        graph.add_edge(index, edge(a, DepKind::Static));
        graph.add_edge(index, edge(b, DepKind::Deferred));
        graph.add_edge(a, edge(c, DepKind::Static));

        (graph, index, b)
    }

    #[test]
    fn test_entry_and_deferred_chunks() {
        let (graph, index, b) = example_graph();

        let chunk_graph = split(&graph, &[("main".to_string(), index)], &no_vendor()).unwrap();

        assert_eq!(chunk_graph.chunks.len(), 2);

        let main = chunk_graph.chunk("main").unwrap();
        assert_eq!(main.kind, ChunkKind::Entry);
        // Dependency order: c before a before index
        let paths: Vec<_> = main
            .modules
            .iter()
            .map(|&m| graph.module(m).path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["c.js", "a.js", "index.js"]);

        let b_chunk_name = chunk_graph.deferred_chunk_name(b).unwrap().to_string();
        assert!(b_chunk_name.starts_with("b."));
        let b_chunk = chunk_graph.chunk(&b_chunk_name).unwrap();
        assert_eq!(b_chunk.kind, ChunkKind::Deferred);
        assert_eq!(b_chunk.modules, vec![b]);

        // The deferred subgraph is absent from the importer's chunk
        assert!(!main.modules.contains(&b));
    }

    #[test]
    fn test_explicit_chunk_name() {
        let mut graph = ModuleGraph::new();
        let index = graph.add_module(module("/app/index.js"));
        let settings = graph.add_module(module("/app/settings.js"));
        graph.add_edge(
            index,
            Edge {
                to: settings,
                specifier: "./settings".to_string(),
                kind: DepKind::Deferred,
                chunk_name: Some("prefs".to_string()),
            },
        );

        let chunk_graph = split(&graph, &[("main".to_string(), index)], &no_vendor()).unwrap();
        assert_eq!(chunk_graph.deferred_chunk_name(settings), Some("prefs"));
        assert!(chunk_graph.chunk("prefs").is_some());
    }

    #[test]
    fn test_shared_extraction() {
        // Two entries both statically import util; util must end up in the
        // shared chunk and in neither entry chunk.
        let mut graph = ModuleGraph::new();
        let one = graph.add_module(module("/app/one.js"));
        let two = graph.add_module(module("/app/two.js"));
        let util = graph.add_module(module("/app/util.js"));
        graph.add_edge(one, edge(util, DepKind::Static));
        graph.add_edge(two, edge(util, DepKind::Static));

        let chunk_graph = split(
            &graph,
            &[("one".to_string(), one), ("two".to_string(), two)],
            &no_vendor(),
        )
        .unwrap();

        let one_chunk = chunk_graph.chunk("one").unwrap();
        let two_chunk = chunk_graph.chunk("two").unwrap();
        let shared = chunk_graph.chunk(SHARED_CHUNK).unwrap();

        assert!(!one_chunk.modules.contains(&util));
        assert!(!two_chunk.modules.contains(&util));
        assert_eq!(shared.modules, vec![util]);
        assert_eq!(one_chunk.depends_on, vec![SHARED_CHUNK.to_string()]);
        assert_eq!(two_chunk.depends_on, vec![SHARED_CHUNK.to_string()]);
    }

    #[test]
    fn test_vendor_extraction() {
        let mut graph = ModuleGraph::new();
        let one = graph.add_module(module("/app/one.js"));
        let two = graph.add_module(module("/app/two.js"));
        let react = graph.add_module(module("/app/node_modules/react/index.js"));
        let util = graph.add_module(module("/app/util.js"));
        graph.add_edge(one, edge(react, DepKind::Static));
        graph.add_edge(two, edge(react, DepKind::Static));
        graph.add_edge(one, edge(util, DepKind::Static));
        graph.add_edge(two, edge(util, DepKind::Static));

        let vendor = VendorPredicate::from_config(&VendorConfig {
            specifiers: vec!["react".to_string()],
            test: Vec::new(),
        })
        .unwrap();

        let chunk_graph = split(
            &graph,
            &[("one".to_string(), one), ("two".to_string(), two)],
            &vendor,
        )
        .unwrap();

        assert_eq!(chunk_graph.chunk(VENDOR_CHUNK).unwrap().modules, vec![react]);
        assert_eq!(chunk_graph.chunk(SHARED_CHUNK).unwrap().modules, vec![util]);

        let one_chunk = chunk_graph.chunk("one").unwrap();
        assert_eq!(
            one_chunk.depends_on,
            vec![VENDOR_CHUNK.to_string(), SHARED_CHUNK.to_string()]
        );
    }

    #[test]
    fn test_cyclic_modules_appear_once() {
        let mut graph = ModuleGraph::new();
        let a = graph.add_module(module("/app/a.js"));
        let b = graph.add_module(module("/app/b.js"));
        graph.add_edge(a, edge(b, DepKind::Static));
        graph.add_edge(b, edge(a, DepKind::Static));

        let chunk_graph = split(&graph, &[("main".to_string(), a)], &no_vendor()).unwrap();
        let main = chunk_graph.chunk("main").unwrap();
        assert_eq!(main.len(), 2);
    }

    #[test]
    fn test_entry_named_like_reserved_chunk_fails_on_extraction() {
        let mut graph = ModuleGraph::new();
        let one = graph.add_module(module("/app/one.js"));
        let two = graph.add_module(module("/app/two.js"));
        let util = graph.add_module(module("/app/util.js"));
        graph.add_edge(one, edge(util, DepKind::Static));
        graph.add_edge(two, edge(util, DepKind::Static));

        let err = split(
            &graph,
            &[("shared".to_string(), one), ("two".to_string(), two)],
            &no_vendor(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }
}
