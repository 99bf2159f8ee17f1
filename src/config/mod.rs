//! Configuration handling for forgepack
//!
//! Parses and manages forgepack.toml configuration files.

mod schema;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

pub use schema::*;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project metadata
    pub project: ProjectConfig,

    /// Entry points for bundling, name -> path; ordered so builds are
    /// deterministic
    #[serde(default)]
    pub entries: BTreeMap<String, String>,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Specifier resolution settings
    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Transform rules, in registration order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Vendor chunk predicate
    #[serde(default)]
    pub vendor: VendorConfig,

    /// Transform cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Build policy settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Root directory (computed from config file location)
    #[serde(skip)]
    pub root: PathBuf,
}

impl Config {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BuildError> {
        let path = path.as_ref();
        let canonical_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| BuildError::Configuration(format!("cannot determine cwd: {e}")))?
                .join(path)
        };

        let content = fs::read_to_string(&canonical_path).map_err(|e| {
            BuildError::Configuration(format!(
                "failed to read config file {}: {e}",
                canonical_path.display()
            ))
        })?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| BuildError::Configuration(format!("failed to parse forgepack.toml: {e}")))?;

        // Root is the directory containing the config file
        config.root = canonical_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration rooted at the given directory
    pub fn default_config(root: impl Into<PathBuf>) -> Self {
        Self {
            project: ProjectConfig {
                name: "my-app".to_string(),
                version: "0.1.0".to_string(),
            },
            entries: {
                let mut map = BTreeMap::new();
                map.insert("main".to_string(), "src/index.js".to_string());
                map
            },
            output: OutputConfig::default(),
            resolve: ResolveConfig::default(),
            rules: Vec::new(),
            vendor: VendorConfig::default(),
            cache: CacheConfig::default(),
            watch: WatchConfig::default(),
            build: BuildConfig::default(),
            root: root.into(),
        }
    }

    /// Validate the configuration; fatal before any traversal begins
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.entries.is_empty() {
            return Err(BuildError::Configuration(
                "at least one entry must be specified in forgepack.toml".to_string(),
            ));
        }

        for (name, path) in &self.entries {
            let full_path = self.root.join(path);
            if !full_path.is_file() {
                return Err(BuildError::Configuration(format!(
                    "entry '{}' points to non-existent file: {}",
                    name,
                    full_path.display()
                )));
            }
        }

        if !self.output.filename.contains("[name]") {
            return Err(BuildError::Configuration(format!(
                "output.filename must contain a [name] token, got '{}'",
                self.output.filename
            )));
        }

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.test.is_empty() || rule.transforms.is_empty() {
                return Err(BuildError::Configuration(format!(
                    "rule #{i} must declare both test patterns and transforms"
                )));
            }
            for pattern in &rule.test {
                Glob::new(pattern).map_err(|e| {
                    BuildError::Configuration(format!("rule #{i} has invalid glob '{pattern}': {e}"))
                })?;
            }
        }

        for pattern in &self.vendor.test {
            Glob::new(pattern).map_err(|e| {
                BuildError::Configuration(format!("vendor has invalid glob '{pattern}': {e}"))
            })?;
        }

        Ok(())
    }

    /// Get the absolute output directory path
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output.dir)
    }

    /// Get the absolute cache directory path, if persistence is configured
    pub fn cache_dir(&self) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }
        self.cache.dir.as_ref().map(|d| self.root.join(d))
    }

    /// Get all entry names and absolute paths, in declaration order
    pub fn all_entries(&self) -> Vec<(String, PathBuf)> {
        self.entries
            .iter()
            .map(|(name, path)| (name.clone(), self.root.join(path)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_entries() {
        let mut config = Config::default_config("/tmp");
        config.entries.clear();
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_validate_rejects_missing_name_token() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/index.js"), "").unwrap();

        let mut config = Config::default_config(dir.path());
        config.output.filename = "bundle.js".to_string();
        assert!(config.validate().is_err());

        config.output.filename = "[name].js".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_computes_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/index.js"), "").unwrap();
        std::fs::write(
            dir.path().join("forgepack.toml"),
            r#"
[project]
name = "fixture"

[entries]
main = "src/index.js"
"#,
        )
        .unwrap();

        let config = Config::load(dir.path().join("forgepack.toml")).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.entries.len(), 1);
        assert_eq!(config.output.filename, "[name].[hash].js");
    }

    #[test]
    fn test_load_rejects_bad_rule_glob() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/index.js"), "").unwrap();
        std::fs::write(
            dir.path().join("forgepack.toml"),
            r#"
[project]
name = "fixture"

[entries]
main = "src/index.js"

[[rules]]
test = ["*.{json"]
transforms = ["json"]
"#,
        )
        .unwrap();

        assert!(Config::load(dir.path().join("forgepack.toml")).is_err());
    }
}
