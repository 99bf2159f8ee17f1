//! Transform pipeline
//!
//! Rewrites module source through registered transform capabilities and
//! extracts declared dependencies. Rules pair a path predicate with an ordered
//! list of capabilities; within a matching rule, capabilities apply
//! last-registered-first, so a capability late in the list runs first and
//! feeds its output to the ones before it. This ordering is a contract:
//! later stages expect input already normalized by earlier ones.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::bundler::DependencyRequest;
use crate::cli::Mode;
use crate::config::Config;
use crate::error::BuildError;
use crate::utils;

/// Static imports and requires: `import x from 's'`, `export { y } from 's'`,
/// `require('s')`
static IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:import|export)\s+(?:(?:\{[^}]*\}|\*\s+as\s+\w+|\w+)\s+from\s+)?["']([^"']+)["']|require\s*\(\s*["']([^"']+)["']\s*\)"#).unwrap()
});

/// Deferred imports: `import('s')`, optionally with an explicit chunk name
/// declared as `import(/* chunkName: "x" */ 's')`
static DYNAMIC_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s*\(\s*(?:/\*\s*chunkName:\s*["']([^"']+)["']\s*\*/\s*)?["']([^"']+)["']\s*\)"#).unwrap()
});

/// Output of one capability or of the whole pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    /// Rewritten source
    pub code: String,

    /// Dependencies declared by the transform (the pipeline adds scanned
    /// imports on top of these)
    pub dependencies: Vec<DependencyRequest>,
}

impl TransformOutput {
    pub fn code_only(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            dependencies: Vec::new(),
        }
    }
}

/// A transform capability: registered externally, invoked by the pipeline
pub trait Transform: Send + Sync {
    /// Capability name, referenced from rule configuration
    fn name(&self) -> &str;

    /// Whether this capability can process the given path
    fn test(&self, path: &Path) -> bool;

    /// Rewrite the source; receives the previous stage's output
    fn apply(&self, path: &Path, source: &str) -> anyhow::Result<TransformOutput>;
}

/// A compiled rule: glob predicate plus ordered capabilities
struct CompiledRule {
    matcher: GlobSet,
    transforms: Vec<Arc<dyn Transform>>,
}

/// The transform pipeline
pub struct Pipeline {
    rules: Vec<CompiledRule>,

    /// Hash of the rule configuration and mode; part of the cache key so a
    /// config change invalidates prior transform output
    config_hash: String,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("rules", &self.rules.len())
            .field("config_hash", &self.config_hash)
            .finish()
    }
}

impl Pipeline {
    /// Build the pipeline from configuration using the built-in capabilities
    pub fn from_config(config: &Config, mode: Mode) -> Result<Self, BuildError> {
        Self::with_capabilities(config, mode, builtin_capabilities())
    }

    /// Build the pipeline from configuration with an explicit capability set.
    /// Rule transform names must each match a capability name.
    pub fn with_capabilities(
        config: &Config,
        mode: Mode,
        capabilities: Vec<Arc<dyn Transform>>,
    ) -> Result<Self, BuildError> {
        let registry: HashMap<&str, &Arc<dyn Transform>> =
            capabilities.iter().map(|t| (t.name(), t)).collect();

        let rule_configs = if config.rules.is_empty() {
            default_rules()
        } else {
            config.rules.clone()
        };

        let mut rules = Vec::with_capacity(rule_configs.len());
        for (i, rule) in rule_configs.iter().enumerate() {
            let mut builder = GlobSetBuilder::new();
            for pattern in &rule.test {
                let glob = Glob::new(pattern).map_err(|e| {
                    BuildError::Configuration(format!(
                        "rule #{i} has invalid glob '{pattern}': {e}"
                    ))
                })?;
                builder.add(glob);
            }
            let matcher = builder.build().map_err(|e| {
                BuildError::Configuration(format!("rule #{i} glob set failed to compile: {e}"))
            })?;

            let mut transforms = Vec::with_capacity(rule.transforms.len());
            for name in &rule.transforms {
                let capability = registry.get(name.as_str()).ok_or_else(|| {
                    BuildError::Configuration(format!(
                        "rule #{i} references unknown transform '{name}'"
                    ))
                })?;
                transforms.push(Arc::clone(capability));
            }

            rules.push(CompiledRule { matcher, transforms });
        }

        let mut hash_input = serde_json::to_string(&rule_configs)
            .map_err(|e| BuildError::Configuration(format!("cannot hash rules: {e}")))?;
        hash_input.push_str(mode.as_str());
        hash_input.push_str(env!("CARGO_PKG_VERSION"));

        Ok(Self {
            rules,
            config_hash: utils::hash_content(hash_input.as_bytes()),
        })
    }

    /// Hash of the transform configuration, part of the cache key
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Run the module's source through every matching rule, then scan the
    /// final code for declared dependencies. A module matching no rule passes
    /// through unchanged.
    pub fn transform(&self, path: &Path, raw: &str) -> Result<TransformOutput, BuildError> {
        let path_str = path.to_string_lossy().replace('\\', "/");
        let mut code = raw.to_string();
        let mut dependencies: Vec<DependencyRequest> = Vec::new();

        for rule in &self.rules {
            if !rule.matcher.is_match(&path_str) {
                continue;
            }

            // Last-registered-first within the rule
            for capability in rule.transforms.iter().rev() {
                if !capability.test(path) {
                    continue;
                }

                debug!("Applying '{}' to {}", capability.name(), path.display());

                let output = capability.apply(path, &code).map_err(|e| {
                    BuildError::Transform {
                        path: path.to_path_buf(),
                        transform: capability.name().to_string(),
                        message: e.to_string(),
                    }
                })?;

                code = output.code;
                for dep in output.dependencies {
                    if !dependencies.contains(&dep) {
                        dependencies.push(dep);
                    }
                }
            }
        }

        for dep in scan_dependencies(&code) {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        Ok(TransformOutput { code, dependencies })
    }
}

/// Extract static and deferred dependency declarations from source code
pub fn scan_dependencies(source: &str) -> Vec<DependencyRequest> {
    let mut dependencies = Vec::new();

    for cap in IMPORT_REGEX.captures_iter(source) {
        if let Some(specifier) = cap.get(1).or_else(|| cap.get(2)) {
            let dep = DependencyRequest::static_import(specifier.as_str());
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
    }

    for cap in DYNAMIC_IMPORT_REGEX.captures_iter(source) {
        if let Some(specifier) = cap.get(2) {
            let chunk_name = cap.get(1).map(|m| m.as_str().to_string());
            let dep = DependencyRequest::deferred_import(specifier.as_str(), chunk_name);
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
    }

    dependencies
}

/// Built-in capabilities; heavyweight transpilers are external collaborators
pub fn builtin_capabilities() -> Vec<Arc<dyn Transform>> {
    vec![Arc::new(JsonModule), Arc::new(CssInject)]
}

/// Rules applied when the configuration declares none
fn default_rules() -> Vec<crate::config::RuleConfig> {
    vec![
        crate::config::RuleConfig {
            test: vec!["*.json".to_string()],
            transforms: vec!["json".to_string()],
        },
        crate::config::RuleConfig {
            test: vec!["*.css".to_string()],
            transforms: vec!["css".to_string()],
        },
    ]
}

/// Wraps JSON files as JS modules
pub struct JsonModule;

impl Transform for JsonModule {
    fn name(&self) -> &str {
        "json"
    }

    fn test(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "json")
    }

    fn apply(&self, path: &Path, source: &str) -> anyhow::Result<TransformOutput> {
        serde_json::from_str::<serde_json::Value>(source)
            .map_err(|e| anyhow::anyhow!("invalid JSON in {}: {e}", path.display()))?;

        Ok(TransformOutput::code_only(format!(
            "module.exports = {};",
            source.trim_end()
        )))
    }
}

/// Wraps CSS files as style-injecting JS modules
pub struct CssInject;

impl Transform for CssInject {
    fn name(&self) -> &str {
        "css"
    }

    fn test(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "css")
    }

    fn apply(&self, _path: &Path, source: &str) -> anyhow::Result<TransformOutput> {
        let escaped = source
            .replace('\\', "\\\\")
            .replace('`', "\\`")
            .replace("${", "\\${");

        Ok(TransformOutput::code_only(format!(
            r#"(function() {{
  var style = document.createElement('style');
  style.textContent = `{escaped}`;
  document.head.appendChild(style);
}})();
module.exports = {{}};
"#
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::DepKind;
    use pretty_assertions::assert_eq;

    fn pipeline(config: &Config) -> Pipeline {
        Pipeline::from_config(config, Mode::Development).unwrap()
    }

    #[test]
    fn test_scan_static_imports() {
        let source = r#"
            import foo from './foo';
            import { bar } from './bar.js';
            import * as baz from '../baz';
            export { qux } from './qux';
            const x = require('./x');
        "#;

        let deps = scan_dependencies(source);
        let specs: Vec<&str> = deps.iter().map(|d| d.specifier.as_str()).collect();
        assert_eq!(specs, vec!["./foo", "./bar.js", "../baz", "./qux", "./x"]);
        assert!(deps.iter().all(|d| d.kind == DepKind::Static));
    }

    #[test]
    fn test_scan_deferred_imports() {
        let source = r#"
            const page = import('./page');
            const named = import(/* chunkName: "settings" */ './settings');
        "#;

        let deps = scan_dependencies(source);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].kind, DepKind::Deferred);
        assert_eq!(deps[0].specifier, "./page");
        assert_eq!(deps[0].chunk_name, None);
        assert_eq!(deps[1].specifier, "./settings");
        assert_eq!(deps[1].chunk_name, Some("settings".to_string()));
    }

    #[test]
    fn test_unmatched_module_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&Config::default_config(dir.path()));

        let source = "export const answer = 42;\n";
        let out = p.transform(Path::new("/app/answer.js"), source).unwrap();
        assert_eq!(out.code, source);
        assert!(out.dependencies.is_empty());
    }

    #[test]
    fn test_json_capability() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&Config::default_config(dir.path()));

        let out = p
            .transform(Path::new("/app/data.json"), r#"{"key": "value"}"#)
            .unwrap();
        assert_eq!(out.code, r#"module.exports = {"key": "value"};"#);

        let err = p
            .transform(Path::new("/app/bad.json"), "{nope}")
            .unwrap_err();
        assert_eq!(err.kind(), "transform");
    }

    #[test]
    fn test_css_capability() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(&Config::default_config(dir.path()));

        let out = p
            .transform(Path::new("/app/style.css"), "body { color: red; }")
            .unwrap();
        assert!(out.code.contains("document.createElement('style')"));
        assert!(out.code.contains("body { color: red; }"));
    }

    #[test]
    fn test_last_registered_first_ordering() {
        struct Tag(&'static str);

        impl Transform for Tag {
            fn name(&self) -> &str {
                self.0
            }
            fn test(&self, _path: &Path) -> bool {
                true
            }
            fn apply(&self, _path: &Path, source: &str) -> anyhow::Result<TransformOutput> {
                Ok(TransformOutput::code_only(format!("{source}|{}", self.0)))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default_config(dir.path());
        config.rules = vec![crate::config::RuleConfig {
            test: vec!["*.txt".to_string()],
            transforms: vec!["first".to_string(), "second".to_string()],
        }];

        let p = Pipeline::with_capabilities(
            &config,
            Mode::Development,
            vec![Arc::new(Tag("first")), Arc::new(Tag("second"))],
        )
        .unwrap();

        // "second" is registered last so it runs first
        let out = p.transform(Path::new("/app/a.txt"), "in").unwrap();
        assert_eq!(out.code, "in|second|first");
    }

    #[test]
    fn test_unknown_transform_name_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default_config(dir.path());
        config.rules = vec![crate::config::RuleConfig {
            test: vec!["*.ts".to_string()],
            transforms: vec!["typescript".to_string()],
        }];

        let err = Pipeline::from_config(&config, Mode::Development).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_config_hash_tracks_rules_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default_config(dir.path());

        let a = Pipeline::from_config(&config, Mode::Development).unwrap();
        let b = Pipeline::from_config(&config, Mode::Development).unwrap();
        assert_eq!(a.config_hash(), b.config_hash());

        let c = Pipeline::from_config(&config, Mode::Production).unwrap();
        assert_ne!(a.config_hash(), c.config_hash());

        let mut changed = config.clone();
        changed.rules = vec![crate::config::RuleConfig {
            test: vec!["*.json".to_string()],
            transforms: vec!["json".to_string()],
        }];
        let d = Pipeline::from_config(&changed, Mode::Development).unwrap();
        assert_ne!(a.config_hash(), d.config_hash());
    }
}
