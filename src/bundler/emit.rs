//! Artifact emission
//!
//! Serializes each chunk into one executable output unit: modules wrapped in
//! isolated scopes keyed by canonical identity, dependency references
//! rewritten so nothing is re-resolved at runtime, content hash substituted
//! into the filename template, manifest written last. Emission embeds nothing
//! but chunk content, so an unchanged chunk always produces byte-identical
//! output.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chunk::{Chunk, ChunkGraph, ChunkKind};
use super::graph::{DepKind, ModuleGraph, ModuleId};
use crate::cli::Mode;
use crate::config::Config;
use crate::error::BuildError;
use crate::utils;

/// Loader runtime included in every entry chunk. The chunk loader keeps
/// exactly one in-flight load request per chunk name; concurrent requesters
/// share the same pending promise. A chunk's `dependsOn` chunks from the
/// manifest register before the chunk itself executes, and a require of an
/// unregistered id throws rather than yielding empty exports.
const RUNTIME: &str = r#"// forgepack runtime
(function (global) {
  if (global.__forgepack_require__) return;
  var modules = {};
  var cache = {};
  var pending = {};
  var registered = {};

  function require(id) {
    if (cache[id]) return cache[id].exports;
    var fn = modules[id];
    if (!fn) throw new Error('module not registered: ' + id);
    var module = { exports: {} };
    cache[id] = module;
    fn(module, module.exports, require);
    return module.exports;
  }

  function chunk(name, added, entryId) {
    for (var id in added) {
      if (!modules[id]) modules[id] = added[id];
    }
    registered[name] = entryId;
    if (pending[name]) {
      pending[name].resolve(entryId != null ? require(entryId) : undefined);
    }
  }

  function load(name) {
    if (pending[name]) return pending[name].promise;
    var entry = {};
    if (name in registered) {
      var id = registered[name];
      entry.promise = Promise.resolve(id != null ? require(id) : undefined);
      pending[name] = entry;
      return entry.promise;
    }
    entry.promise = new Promise(function (resolve, reject) {
      entry.resolve = resolve;
      var manifest = global.__forgepack_manifest__ || {};
      var info = manifest[name];
      if (!info) {
        reject(new Error('unknown chunk: ' + name));
        return;
      }
      // Shared and vendor chunks this one requires from must register first
      Promise.all((info.dependsOn || []).map(load)).then(function () {
        var script = document.createElement('script');
        script.src = info.url;
        script.onerror = function () {
          delete pending[name];
          reject(new Error('failed to load chunk: ' + name));
        };
        document.head.appendChild(script);
      }, reject);
    });
    pending[name] = entry;
    return entry.promise;
  }

  global.__forgepack_modules__ = modules;
  global.__forgepack_require__ = require;
  global.__forgepack_chunk__ = chunk;
  global.__forgepack_load__ = load;
})(typeof globalThis !== 'undefined' ? globalThis : window);
"#;

/// One emitted file
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Chunk the artifact was emitted from
    pub chunk_name: String,

    /// Final filename, hash substituted
    pub file: String,

    /// Absolute output path
    pub path: PathBuf,

    /// Content hash of the emitted bytes
    pub hash: String,

    /// Size in bytes
    pub size: usize,
}

/// Manifest entry for one chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Artifact filename within the output directory
    pub file: String,

    /// Public URL (public_url prefix + filename)
    pub url: String,

    /// Chunks that must be loaded before this one
    #[serde(rename = "dependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Chunk name to artifact mapping; ordered so serialization is deterministic
pub type Manifest = BTreeMap<String, ManifestEntry>;

/// Result of emission
#[derive(Debug)]
pub struct EmitResult {
    pub artifacts: Vec<Artifact>,
    pub manifest: Manifest,
}

/// The artifact emitter
pub struct Emitter {
    config: Arc<Config>,
    mode: Mode,
    output_dir: PathBuf,
}

impl Emitter {
    pub fn new(config: Arc<Config>, mode: Mode, output_dir: PathBuf) -> Self {
        Self {
            config,
            mode,
            output_dir,
        }
    }

    /// Emit every chunk not named in `withheld`, then the manifest. The
    /// manifest write is the build's completion point.
    pub fn emit(
        &self,
        graph: &ModuleGraph,
        chunk_graph: &ChunkGraph,
        withheld: &HashSet<String>,
    ) -> Result<EmitResult, BuildError> {
        fs::create_dir_all(&self.output_dir).map_err(|e| BuildError::Emit {
            path: self.output_dir.clone(),
            source: e,
        })?;

        let mut artifacts = Vec::new();
        let mut manifest = Manifest::new();

        for chunk in &chunk_graph.chunks {
            if withheld.contains(&chunk.name) {
                debug!("Withholding chunk '{}'", chunk.name);
                continue;
            }

            let code = self.render_chunk(graph, chunk_graph, chunk);
            let hash = utils::short_hash(code.as_bytes(), self.mode.hash_len());
            let file = utils::render_filename(&self.config.output.filename, &chunk.name, &hash);
            let path = self.output_dir.join(&file);

            fs::write(&path, &code).map_err(|e| BuildError::Emit {
                path: path.clone(),
                source: e,
            })?;

            manifest.insert(
                chunk.name.clone(),
                ManifestEntry {
                    file: file.clone(),
                    url: format!("{}{}", self.public_prefix(), file),
                    depends_on: chunk.depends_on.clone(),
                },
            );

            artifacts.push(Artifact {
                chunk_name: chunk.name.clone(),
                file,
                path,
                hash,
                size: code.len(),
            });
        }

        // A withheld chunk's previous artifact is still good on disk; its
        // prior manifest entry carries forward so a failed rebuild never
        // drops chunks that last built cleanly
        if !withheld.is_empty() {
            if let Some(previous) = self.previous_manifest() {
                for name in withheld {
                    if let Some(entry) = previous.get(name) {
                        manifest
                            .entry(name.clone())
                            .or_insert_with(|| entry.clone());
                    }
                }
            }
        }

        if self.config.output.manifest {
            let manifest_path = self.output_dir.join("manifest.json");
            let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
                BuildError::Configuration(format!("cannot serialize manifest: {e}"))
            })?;
            fs::write(&manifest_path, json).map_err(|e| BuildError::Emit {
                path: manifest_path,
                source: e,
            })?;
        }

        Ok(EmitResult {
            artifacts,
            manifest,
        })
    }

    /// Manifest left by the previous build, if readable
    fn previous_manifest(&self) -> Option<Manifest> {
        let path = self.output_dir.join("manifest.json");
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn public_prefix(&self) -> String {
        let prefix = &self.config.output.public_url;
        if prefix.ends_with('/') {
            prefix.clone()
        } else {
            format!("{prefix}/")
        }
    }

    /// Render one chunk to its final byte content. Pure with respect to the
    /// graphs: the same content renders to the same bytes.
    pub fn render_chunk(
        &self,
        graph: &ModuleGraph,
        chunk_graph: &ChunkGraph,
        chunk: &Chunk,
    ) -> String {
        let mut out = String::new();

        if chunk.kind == ChunkKind::Entry {
            out.push_str(RUNTIME);
        }

        let entry_id = chunk
            .entry
            .map(|id| {
                format!(
                    "\"{}\"",
                    utils::module_identity(&self.config.root, &graph.module(id).path)
                )
            })
            .unwrap_or_else(|| "null".to_string());

        out.push_str(&format!("__forgepack_chunk__(\"{}\", {{\n", chunk.name));

        for &id in &chunk.modules {
            out.push_str(&self.render_module(graph, chunk_graph, id));
        }

        out.push_str(&format!("}}, {entry_id});\n"));

        if chunk.kind == ChunkKind::Entry {
            out.push_str(&format!("__forgepack_require__({entry_id});\n"));
        }

        out
    }

    /// Wrap one module in an isolated scope, with dependency references
    /// rewritten to canonical identities and deferred import sites rewritten
    /// to chunk load requests
    fn render_module(&self, graph: &ModuleGraph, chunk_graph: &ChunkGraph, id: ModuleId) -> String {
        let module = graph.module(id);
        let identity = utils::module_identity(&self.config.root, &module.path);
        let mut code = module.transformed.clone();

        // Deferred sites first, so the static pass below cannot touch a
        // specifier that only appears inside an import(...) expression
        for edge in graph.edges(id) {
            if edge.kind != DepKind::Deferred {
                continue;
            }
            if let Some(name) = chunk_graph.deferred_chunk_name(edge.to) {
                let pattern = format!(
                    r#"import\s*\(\s*(?:/\*[^*]*\*/\s*)?["']{}["']\s*\)"#,
                    regex::escape(&edge.specifier)
                );
                // Pattern is built from a literal specifier; it always compiles
                if let Ok(re) = Regex::new(&pattern) {
                    code = re
                        .replace_all(&code, format!("__forgepack_load__(\"{name}\")"))
                        .into_owned();
                }
            }
        }

        for edge in graph.edges(id) {
            if edge.kind != DepKind::Static {
                continue;
            }
            let target = utils::module_identity(&self.config.root, &graph.module(edge.to).path);
            // Anchored to import syntax so a string literal that merely
            // equals the specifier stays untouched
            let pattern = format!(
                r#"(\brequire\s*\(\s*|\bfrom\s+|\bimport\s+|\bexport\s+)["']{}["']"#,
                regex::escape(&edge.specifier)
            );
            if let Ok(re) = Regex::new(&pattern) {
                code = re
                    .replace_all(&code, |caps: &regex::Captures| {
                        format!("{}\"{target}\"", &caps[1])
                    })
                    .into_owned();
            }
        }

        format!(
            "\"{identity}\": function(module, exports, require) {{\n{code}\n}},\n"
        )
    }
}
