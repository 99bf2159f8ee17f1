//! Module resolution
//!
//! Maps import specifiers plus the importing module's path to canonical
//! absolute file paths. Resolution is a pure function of the specifier, the
//! importer, and the filesystem snapshot; no state is kept between calls.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::BuildError;

/// Module resolver
pub struct Resolver {
    /// Project configuration
    config: Arc<Config>,
}

impl Resolver {
    /// Create a new resolver
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Resolve an import specifier to a canonical absolute file path.
    ///
    /// Relative specifiers (`./x`, `../x`) and absolute specifiers resolve
    /// against the importer's directory; bare specifiers resolve via an
    /// ascending `node_modules` search. When the specifier carries no
    /// extension, the configured extension list is probed in order, with a
    /// documented precedence: an exact file wins over a file with an inferred
    /// extension, which wins over a directory index (`x.js` beats `x/index.js`).
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, BuildError> {
        debug!("Resolving '{}' from '{}'", specifier, from.display());

        let resolved = if specifier.starts_with('.') || specifier.starts_with('/') {
            let base_dir = from.parent().unwrap_or(Path::new("."));
            self.resolve_relative(specifier, base_dir)
        } else {
            self.resolve_bare(specifier, from)
        };

        match resolved {
            Some(path) => {
                // Canonicalize so the same file reached through different
                // specifiers yields one module identity
                fs::canonicalize(&path).map_err(|e| BuildError::Resolution {
                    specifier: specifier.to_string(),
                    importer: from.to_path_buf(),
                    reason: format!("cannot canonicalize {}: {e}", path.display()),
                })
            }
            None => Err(BuildError::Resolution {
                specifier: specifier.to_string(),
                importer: from.to_path_buf(),
                reason: "no file matched".to_string(),
            }),
        }
    }

    /// Resolve a relative or absolute specifier against a base directory
    fn resolve_relative(&self, specifier: &str, base_dir: &Path) -> Option<PathBuf> {
        let target = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            base_dir.join(specifier)
        };

        // Exact file first
        if target.is_file() {
            return Some(target);
        }

        // Then extension inference, in configured order
        for ext in &self.config.resolve.extensions {
            let mut candidate = target.as_os_str().to_owned();
            candidate.push(".");
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        // Directory index last
        if target.is_dir() {
            for ext in &self.config.resolve.extensions {
                let index = target.join(format!("index.{ext}"));
                if index.is_file() {
                    return Some(index);
                }
            }
        }

        None
    }

    /// Resolve a bare specifier by walking up toward the filesystem root
    /// looking for a `node_modules` directory containing the named package
    fn resolve_bare(&self, specifier: &str, from: &Path) -> Option<PathBuf> {
        let mut current = from.to_path_buf();

        loop {
            let node_modules = current.join("node_modules");

            if node_modules.is_dir() {
                if let Some(resolved) = self.resolve_in_node_modules(&node_modules, specifier) {
                    return Some(resolved);
                }
            }

            if !current.pop() {
                break;
            }
        }

        None
    }

    /// Resolve a package specifier within one node_modules directory
    fn resolve_in_node_modules(&self, node_modules: &Path, specifier: &str) -> Option<PathBuf> {
        // Split specifier into package name and subpath
        let (package_name, subpath) = if specifier.starts_with('@') {
            // Scoped package: @scope/name or @scope/name/subpath
            let parts: Vec<&str> = specifier.splitn(3, '/').collect();
            if parts.len() < 2 {
                return None;
            }
            let name = format!("{}/{}", parts[0], parts[1]);
            (name, parts.get(2).map(|s| s.to_string()))
        } else {
            let parts: Vec<&str> = specifier.splitn(2, '/').collect();
            (parts[0].to_string(), parts.get(1).map(|s| s.to_string()))
        };

        let package_dir = node_modules.join(&package_name);

        if !package_dir.is_dir() {
            return None;
        }

        // A subpath resolves like a relative import inside the package
        if let Some(sub) = subpath {
            return self.resolve_relative(&format!("./{sub}"), &package_dir);
        }

        // Otherwise consult package.json for the module/main entry
        let package_json = package_dir.join("package.json");

        if package_json.is_file() {
            if let Ok(content) = fs::read_to_string(&package_json) {
                if let Ok(pkg) = serde_json::from_str::<serde_json::Value>(&content) {
                    // ESM entry first
                    if let Some(module) = pkg.get("module").and_then(|v| v.as_str()) {
                        if let Some(p) = self.resolve_relative(module, &package_dir) {
                            return Some(p);
                        }
                    }

                    if let Some(main) = pkg.get("main").and_then(|v| v.as_str()) {
                        if let Some(p) = self.resolve_relative(main, &package_dir) {
                            return Some(p);
                        }
                    }
                }
            }
        }

        self.resolve_relative("./index", &package_dir)
    }
}
