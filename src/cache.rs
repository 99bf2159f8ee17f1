//! Transform cache
//!
//! Keyed by (canonical path, raw-source hash) and guarded by the transform
//! configuration hash: a hit means the transform pipeline can be skipped for
//! that module. The cache lives for the duration of a watch process and is
//! optionally persisted as a JSON index under the configured cache directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bundler::DependencyRequest;
use crate::error::BuildError;

const INDEX_FILE: &str = "index.json";

/// One cached transform result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hash of the raw source the entry was computed from
    pub source_hash: String,

    /// Transformed code
    pub code: String,

    /// Dependencies declared by the transform pipeline
    pub dependencies: Vec<DependencyRequest>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    config_hash: String,
    entries: HashMap<PathBuf, CacheEntry>,
}

/// The transform cache; explicit state passed into the graph builder, never
/// ambient
#[derive(Debug)]
pub struct TransformCache {
    enabled: bool,
    dir: Option<PathBuf>,
    config_hash: String,
    entries: HashMap<PathBuf, CacheEntry>,
}

impl TransformCache {
    /// A cache that never hits and never persists
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            dir: None,
            config_hash: String::new(),
            entries: HashMap::new(),
        }
    }

    /// Create a cache, loading a persisted index from `dir` when present.
    /// An index written under a different transform configuration is
    /// discarded wholesale.
    pub fn new(dir: Option<PathBuf>, config_hash: &str) -> Self {
        let mut entries = HashMap::new();

        if let Some(dir) = &dir {
            let index_path = dir.join(INDEX_FILE);
            if let Ok(content) = fs::read_to_string(&index_path) {
                match serde_json::from_str::<CacheIndex>(&content) {
                    Ok(index) if index.config_hash == config_hash => {
                        debug!(
                            "Loaded {} cached transforms from {}",
                            index.entries.len(),
                            index_path.display()
                        );
                        entries = index.entries;
                    }
                    Ok(_) => {
                        debug!("Discarding cache index: transform configuration changed");
                    }
                    Err(e) => {
                        debug!("Discarding unreadable cache index: {e}");
                    }
                }
            }
        }

        Self {
            enabled: true,
            dir,
            config_hash: config_hash.to_string(),
            entries,
        }
    }

    /// Look up a prior transform result for an unchanged source
    pub fn lookup(&self, path: &Path, source_hash: &str) -> Option<&CacheEntry> {
        if !self.enabled {
            return None;
        }

        self.entries
            .get(path)
            .filter(|entry| entry.source_hash == source_hash)
    }

    /// Record a transform result
    pub fn store(
        &mut self,
        path: PathBuf,
        source_hash: String,
        code: String,
        dependencies: Vec<DependencyRequest>,
    ) {
        if !self.enabled {
            return;
        }

        self.entries.insert(
            path,
            CacheEntry {
                source_hash,
                code,
                dependencies,
            },
        );
    }

    /// Drop entries for changed paths
    pub fn invalidate<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            if self.entries.remove(path.as_ref()).is_some() {
                debug!("Invalidated cache entry for {}", path.as_ref().display());
            }
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the index to the cache directory, if one is configured
    pub fn persist(&self) -> Result<(), BuildError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        fs::create_dir_all(dir).map_err(|e| BuildError::Emit {
            path: dir.clone(),
            source: e,
        })?;

        let index = CacheIndex {
            config_hash: self.config_hash.clone(),
            entries: self.entries.clone(),
        };

        let index_path = dir.join(INDEX_FILE);
        let json = serde_json::to_string(&index).map_err(|e| {
            BuildError::Configuration(format!("cannot serialize cache index: {e}"))
        })?;

        fs::write(&index_path, json).map_err(|e| BuildError::Emit {
            path: index_path,
            source: e,
        })
    }
}
