//! Utility functions and helpers

use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex digest of the given content
pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Truncated hex digest, for filenames and chunk ids
pub fn short_hash(content: &[u8], len: usize) -> String {
    let mut hash = hash_content(content);
    hash.truncate(len);
    hash
}

/// Canonical module identity used in emitted code and the manifest.
///
/// Root-relative with forward slashes when the module lives under the project
/// root, absolute otherwise. Never a raw specifier.
pub fn module_identity(root: &Path, path: &Path) -> String {
    match pathdiff::diff_paths(path, root) {
        Some(rel) if !rel.starts_with("..") => rel.display().to_string().replace('\\', "/"),
        _ => path.display().to_string().replace('\\', "/"),
    }
}

/// Substitute `[name]` and `[hash]` tokens in an output filename template
pub fn render_filename(template: &str, name: &str, hash: &str) -> String {
    template.replace("[name]", name).replace("[hash]", hash)
}

/// Format bytes as human-readable size
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs_f64();

    if secs >= 1.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.0}ms", secs * 1000.0)
    }
}
