//! Configuration schema definitions

use serde::{Deserialize, Serialize};

/// Project metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Artifact filename template with [name] and [hash] tokens
    #[serde(default = "default_filename")]
    pub filename: String,

    /// Public URL prefix for emitted assets
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Write manifest.json mapping chunk names to artifact paths
    #[serde(default = "default_true")]
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            filename: default_filename(),
            public_url: default_public_url(),
            manifest: true,
        }
    }
}

fn default_output_dir() -> String {
    "dist".to_string()
}

fn default_filename() -> String {
    "[name].[hash].js".to_string()
}

fn default_public_url() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

/// Specifier resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Extensions probed, in order, when a specifier has none
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["js", "mjs", "cjs", "json", "css"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// A transform rule: path predicate plus an ordered list of transform names.
///
/// Within one rule, transforms apply last-registered-first, so later entries in
/// the list run earlier stages' output through earlier entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Glob patterns matched against the module path
    pub test: Vec<String>,

    /// Registered transform capability names, applied last-to-first
    pub transforms: Vec<String>,
}

/// Vendor chunk predicate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorConfig {
    /// Package specifiers treated as vendor code (matched under node_modules)
    #[serde(default)]
    pub specifiers: Vec<String>,

    /// Glob patterns matched against the module path
    #[serde(default)]
    pub test: Vec<String>,
}

/// Transform cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the transform cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory the cache index is persisted to; in-memory only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce window for coalescing file-change events
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    200
}

/// Build policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Abort on the first module error instead of emitting unaffected chunks
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { fail_fast: true }
    }
}
