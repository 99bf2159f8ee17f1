//! Core bundler implementation
//!
//! Drives a build end to end: graph construction from the entry points,
//! chunk splitting, artifact emission. Module loading and transformation run
//! on a bounded worker pool; the coordinator owns the visited set, so each
//! canonical path is scheduled exactly once per build no matter how many
//! importers discover it concurrently.

mod chunk;
mod emit;
mod graph;

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::cache::TransformCache;
use crate::cli::BuildOptions;
use crate::config::Config;
use crate::error::{BuildError, ErrorPolicy};
use crate::resolver::Resolver;
use crate::transform::Pipeline;
use crate::utils;

pub use chunk::{split, Chunk, ChunkGraph, ChunkKind, VendorPredicate, SHARED_CHUNK, VENDOR_CHUNK};
pub use emit::{Artifact, EmitResult, Emitter, Manifest, ManifestEntry};
pub use graph::{DepKind, DependencyRequest, Edge, Module, ModuleGraph, ModuleId};

/// Result of a completed build
#[derive(Debug)]
pub struct BuildResult {
    /// Emitted artifacts
    pub artifacts: Vec<Artifact>,

    /// Chunk name to artifact mapping
    pub manifest: Manifest,

    /// Per-module errors tolerated under the best-effort policy
    pub errors: Vec<BuildError>,

    /// Modules in the graph
    pub module_count: usize,

    /// Modules served from the transform cache
    pub cache_hits: usize,
}

/// A module loaded and transformed by a worker
struct Loaded {
    path: PathBuf,
    source: String,
    source_hash: String,
    code: String,
    dependencies: Vec<DependencyRequest>,
    from_cache: bool,
}

/// The main bundler
pub struct Bundler {
    /// Project configuration
    config: Arc<Config>,

    /// Build options
    options: BuildOptions,

    /// Module resolver
    resolver: Resolver,

    /// Transform pipeline
    pipeline: Arc<Pipeline>,

    /// Transform cache; lives across builds in watch mode
    cache: Arc<Mutex<TransformCache>>,

    /// Worker pool bound
    limit: Arc<Semaphore>,
}

impl Bundler {
    /// Create a new bundler instance
    pub fn new(config: Config, options: BuildOptions) -> Result<Self, BuildError> {
        let config = Arc::new(config);
        let resolver = Resolver::new(config.clone());
        let pipeline = Arc::new(Pipeline::from_config(&config, options.mode)?);

        let cache = if config.cache.enabled {
            TransformCache::new(config.cache_dir(), pipeline.config_hash())
        } else {
            TransformCache::disabled()
        };

        let jobs = options.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });

        Ok(Self {
            config,
            options,
            resolver,
            pipeline,
            cache: Arc::new(Mutex::new(cache)),
            limit: Arc::new(Semaphore::new(jobs.max(1))),
        })
    }

    fn policy(&self) -> ErrorPolicy {
        if self.options.best_effort || !self.config.build.fail_fast {
            ErrorPolicy::BestEffort
        } else {
            ErrorPolicy::FailFast
        }
    }

    /// Drop cache entries for changed paths, ahead of an incremental rebuild
    pub fn invalidate<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<std::path::Path>,
    {
        self.cache.lock().invalidate(paths);
    }

    /// Run one build: graph, chunks, artifacts, manifest.
    ///
    /// Returns `Err` when the build produced nothing (fail-fast, or a fatal
    /// configuration/emit error); `Ok` with a non-empty error list when the
    /// best-effort policy withheld some chunks but emitted the rest.
    pub async fn build(&self) -> Result<BuildResult, Vec<BuildError>> {
        let start = Instant::now();
        let policy = self.policy();

        // Entry paths must canonicalize; identity is the canonical path
        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        for (name, path) in self.config.all_entries() {
            let canonical = fs::canonicalize(&path).map_err(|e| {
                vec![BuildError::Read {
                    path: path.clone(),
                    source: e,
                }]
            })?;
            entries.push((name, canonical));
        }

        info!("Building module graph...");
        let (graph, errors, cache_hits) = self
            .build_graph(entries.iter().map(|(_, p)| p.clone()).collect())
            .await;

        if !errors.is_empty() && policy == ErrorPolicy::FailFast {
            return Err(errors);
        }

        info!("Splitting {} module(s) into chunks...", graph.len());
        let entry_ids: Vec<(String, ModuleId)> = entries
            .iter()
            .filter_map(|(name, path)| graph.module_id(path).map(|id| (name.clone(), id)))
            .collect();

        let vendor = VendorPredicate::from_config(&self.config.vendor).map_err(|e| vec![e])?;
        let chunk_graph = split(&graph, &entry_ids, &vendor).map_err(|e| vec![e])?;

        // Chunks touched by a failed module are withheld under best-effort
        let withheld: HashSet<String> = chunk_graph
            .chunks
            .iter()
            .filter(|c| c.modules.iter().any(|&m| graph.module(m).broken))
            .map(|c| c.name.clone())
            .collect();

        info!("Emitting {} chunk(s)...", chunk_graph.chunks.len());
        let output_dir = self
            .options
            .outdir
            .clone()
            .unwrap_or_else(|| self.config.output_dir());
        let emitter = Emitter::new(self.config.clone(), self.options.mode, output_dir);
        let emitted = emitter
            .emit(&graph, &chunk_graph, &withheld)
            .map_err(|e| vec![e])?;

        if let Err(e) = self.cache.lock().persist() {
            // The cache is an accelerator; losing it does not fail the build
            tracing::warn!("failed to persist transform cache: {e}");
        }

        debug!("Build completed in {:?}", start.elapsed());

        Ok(BuildResult {
            artifacts: emitted.artifacts,
            manifest: emitted.manifest,
            errors,
            module_count: graph.len(),
            cache_hits,
        })
    }

    /// Build the module graph by a parallel worklist traversal from the
    /// entries. Cycles are legal: a dependency already scheduled is recorded
    /// as an edge without being re-entered.
    async fn build_graph(
        &self,
        entry_paths: Vec<PathBuf>,
    ) -> (ModuleGraph, Vec<BuildError>, usize) {
        let policy = self.policy();
        let entry_set: HashSet<PathBuf> = entry_paths.iter().cloned().collect();

        let mut graph = ModuleGraph::new();
        let mut errors: Vec<BuildError> = Vec::new();
        let mut scheduled: HashSet<PathBuf> = HashSet::new();
        let mut raw_edges: Vec<(PathBuf, DependencyRequest, PathBuf)> = Vec::new();
        let mut tasks: JoinSet<Result<Loaded, BuildError>> = JoinSet::new();
        let mut cache_hits = 0usize;
        let mut fatal = false;

        for path in entry_paths {
            self.schedule(path, &mut scheduled, &mut tasks);
        }

        'outer: while let Some(joined) = tasks.join_next().await {
            let loaded = match joined {
                Ok(Ok(loaded)) => loaded,
                Ok(Err(e)) => {
                    errors.push(e);
                    if policy == ErrorPolicy::FailFast {
                        fatal = true;
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    if e.is_cancelled() {
                        continue;
                    }
                    errors.push(BuildError::Configuration(format!(
                        "module worker panicked: {e}"
                    )));
                    fatal = true;
                    break;
                }
            };

            if loaded.from_cache {
                cache_hits += 1;
            }

            let is_entry = entry_set.contains(&loaded.path);
            let id = graph.add_module(Module {
                path: loaded.path.clone(),
                source: loaded.source,
                transformed: loaded.code,
                source_hash: loaded.source_hash,
                is_entry,
                dependencies: loaded.dependencies.clone(),
                broken: false,
            });

            for request in loaded.dependencies {
                match self.resolver.resolve(&request.specifier, &loaded.path) {
                    Ok(target) => {
                        self.schedule(target.clone(), &mut scheduled, &mut tasks);
                        raw_edges.push((loaded.path.clone(), request, target));
                    }
                    Err(e) => {
                        errors.push(e);
                        graph.module_mut(id).broken = true;
                        if policy == ErrorPolicy::FailFast {
                            fatal = true;
                            break 'outer;
                        }
                    }
                }
            }
        }

        if fatal {
            tasks.abort_all();
        }

        // Wire edges now that every surviving module has an id. Edges are
        // added per importer in source order, keeping traversals
        // deterministic regardless of worker completion order.
        for (from, request, to) in raw_edges {
            let Some(from_id) = graph.module_id(&from) else {
                continue;
            };
            match graph.module_id(&to) {
                Some(to_id) => graph.add_edge(
                    from_id,
                    Edge {
                        to: to_id,
                        specifier: request.specifier,
                        kind: request.kind,
                        chunk_name: request.chunk_name,
                    },
                ),
                // Target scheduled but its load or transform failed
                None => graph.module_mut(from_id).broken = true,
            }
        }

        (graph, errors, cache_hits)
    }

    /// Schedule a module load unless its canonical path is already in flight
    /// or done (single-flight per module identity)
    fn schedule(
        &self,
        path: PathBuf,
        scheduled: &mut HashSet<PathBuf>,
        tasks: &mut JoinSet<Result<Loaded, BuildError>>,
    ) {
        if !scheduled.insert(path.clone()) {
            return;
        }

        let pipeline = self.pipeline.clone();
        let cache = self.cache.clone();
        let limit = self.limit.clone();

        tasks.spawn(async move {
            let _permit = limit.acquire_owned().await.map_err(|_| {
                BuildError::Configuration("worker pool closed mid-build".to_string())
            })?;

            tokio::task::spawn_blocking(move || load_and_transform(&path, &pipeline, &cache))
                .await
                .map_err(|e| BuildError::Configuration(format!("module worker failed: {e}")))?
        });
    }
}

/// Read, hash, and transform one module, consulting the cache first
fn load_and_transform(
    path: &PathBuf,
    pipeline: &Pipeline,
    cache: &Mutex<TransformCache>,
) -> Result<Loaded, BuildError> {
    let source = fs::read_to_string(path).map_err(|e| BuildError::Read {
        path: path.clone(),
        source: e,
    })?;
    let source_hash = utils::hash_content(source.as_bytes());

    if let Some(entry) = cache.lock().lookup(path, &source_hash) {
        debug!("Cache hit for {}", path.display());
        return Ok(Loaded {
            path: path.clone(),
            code: entry.code.clone(),
            dependencies: entry.dependencies.clone(),
            source,
            source_hash,
            from_cache: true,
        });
    }

    let output = pipeline.transform(path, &source)?;

    cache.lock().store(
        path.clone(),
        source_hash.clone(),
        output.code.clone(),
        output.dependencies.clone(),
    );

    Ok(Loaded {
        path: path.clone(),
        code: output.code,
        dependencies: output.dependencies,
        source,
        source_hash,
        from_cache: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn bundler(root: &Path, entries: &[(&str, &str)]) -> Bundler {
        let mut config = Config::default_config(root);
        config.entries = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Bundler::new(config, BuildOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_build_dedupes_shared_import() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.js", "require('./a'); require('./b');");
        write(dir.path(), "src/a.js", "require('./util');");
        write(dir.path(), "src/b.js", "require('./util');");
        write(dir.path(), "src/util.js", "module.exports = 1;");

        let b = bundler(dir.path(), &[("main", "src/index.js")]);
        let result = b.build().await.unwrap();

        // util visited once despite two importers
        assert_eq!(result.module_count, 4);
        assert!(result.errors.is_empty());
        assert_eq!(result.manifest.len(), 1);
    }

    #[tokio::test]
    async fn test_build_survives_cycles() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.js", "require('./a');");
        write(dir.path(), "src/a.js", "require('./b');");
        write(dir.path(), "src/b.js", "require('./a');");

        let b = bundler(dir.path(), &[("main", "src/index.js")]);
        let result = b.build().await.unwrap();

        assert_eq!(result.module_count, 3);
        let main = result.manifest.get("main").unwrap();
        let code = fs::read_to_string(dir.path().join("dist").join(&main.file)).unwrap();
        assert_eq!(code.matches("\"src/a.js\": function").count(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_reports_resolution_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.js", "require('./missing');");

        let b = bundler(dir.path(), &[("main", "src/index.js")]);
        let errors = b.build().await.unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), "resolution");
    }

    #[tokio::test]
    async fn test_best_effort_emits_unaffected_chunks() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/ok.js", "module.exports = 1;");
        write(dir.path(), "src/bad.js", "require('./missing');");

        let mut config = Config::default_config(dir.path());
        config.entries = [
            ("ok".to_string(), "src/ok.js".to_string()),
            ("bad".to_string(), "src/bad.js".to_string()),
        ]
        .into_iter()
        .collect();
        config.build.fail_fast = false;

        let b = Bundler::new(config, BuildOptions::default()).unwrap();
        let result = b.build().await.unwrap();

        assert_eq!(result.errors.len(), 1);
        assert!(result.manifest.contains_key("ok"));
        assert!(!result.manifest.contains_key("bad"));
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.js", "module.exports = 1;");

        let mut config = Config::default_config(dir.path());
        config.build.fail_fast = false;
        let b = Bundler::new(config, BuildOptions::default()).unwrap();

        let first = b.build().await.unwrap();
        let good = first.manifest.get("main").unwrap().clone();

        // Break the entry and rebuild; the last good artifact and its
        // manifest entry must survive
        write(dir.path(), "src/index.js", "require('./nowhere');");
        b.invalidate([fs::canonicalize(dir.path().join("src/index.js")).unwrap()]);
        let second = b.build().await.unwrap();

        assert_eq!(second.errors.len(), 1);
        assert_eq!(second.manifest.get("main"), Some(&good));

        let written: Manifest = serde_json::from_str(
            &fs::read_to_string(dir.path().join("dist/manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(written.get("main"), Some(&good));
        assert!(dir.path().join("dist").join(&good.file).exists());
    }

    #[tokio::test]
    async fn test_second_build_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/index.js", "require('./a');");
        write(dir.path(), "src/a.js", "module.exports = 1;");

        let b = bundler(dir.path(), &[("main", "src/index.js")]);
        let first = b.build().await.unwrap();
        assert_eq!(first.cache_hits, 0);

        let second = b.build().await.unwrap();
        assert_eq!(second.cache_hits, 2);
        assert_eq!(
            first.manifest.get("main").unwrap().file,
            second.manifest.get("main").unwrap().file
        );
    }

    #[tokio::test]
    async fn test_worked_example_chunks_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "src/index.js",
            "require('./a'); import('./b');",
        );
        write(dir.path(), "src/a.js", "require('./c');");
        write(dir.path(), "src/b.js", "module.exports = 'deferred';");
        write(dir.path(), "src/c.js", "module.exports = 'leaf';");

        let b = bundler(dir.path(), &[("main", "src/index.js")]);
        let first = b.build().await.unwrap();
        assert_eq!(first.manifest.len(), 2);

        let b_chunk_name = first
            .manifest
            .keys()
            .find(|k| k.starts_with("b."))
            .unwrap()
            .clone();

        // Changing c changes main's artifact but not b's
        write(dir.path(), "src/c.js", "module.exports = 'changed';");
        b.invalidate([fs::canonicalize(dir.path().join("src/c.js")).unwrap()]);
        let second = b.build().await.unwrap();

        assert_ne!(
            first.manifest.get("main").unwrap().file,
            second.manifest.get("main").unwrap().file
        );
        assert_eq!(
            first.manifest.get(&b_chunk_name).unwrap().file,
            second.manifest.get(&b_chunk_name).unwrap().file
        );
    }
}
