//! Build error taxonomy
//!
//! Resolution and transform failures are collected per module and reported as a
//! batch at the end of a build; configuration errors abort before any traversal
//! begins; emit errors abort the build that produced them.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// An error produced while building, splitting, or emitting
#[derive(Debug, Error)]
pub enum BuildError {
    /// A specifier could not be mapped to an existing file
    #[error("cannot resolve '{specifier}' imported from {}: {reason}", importer.display())]
    Resolution {
        specifier: String,
        importer: PathBuf,
        reason: String,
    },

    /// A registered transform failed or returned malformed output
    #[error("transform '{transform}' failed for {}: {message}", path.display())]
    Transform {
        path: PathBuf,
        transform: String,
        message: String,
    },

    /// Missing or invalid entry, output, or rule definitions
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A module's source could not be read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An artifact or manifest could not be written
    #[error("failed to write {}: {source}", path.display())]
    Emit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Short kind tag used in the structured error list
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::Resolution { .. } => "resolution",
            BuildError::Transform { .. } => "transform",
            BuildError::Configuration(_) => "configuration",
            BuildError::Read { .. } => "read",
            BuildError::Emit { .. } => "emit",
        }
    }

    /// Path the error is attached to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            BuildError::Resolution { importer, .. } => Some(importer),
            BuildError::Transform { path, .. } => Some(path),
            BuildError::Read { path, .. } => Some(path),
            BuildError::Emit { path, .. } => Some(path),
            BuildError::Configuration(_) => None,
        }
    }
}

/// What to do when per-module errors are encountered mid-build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the whole build on the first error
    #[default]
    FailFast,
    /// Collect errors, withhold affected chunks, emit the rest
    BestEffort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = BuildError::Resolution {
            specifier: "./missing".to_string(),
            importer: PathBuf::from("/app/index.js"),
            reason: "no file matched".to_string(),
        };
        assert_eq!(err.kind(), "resolution");
        assert_eq!(err.path(), Some(Path::new("/app/index.js")));
        assert!(err.to_string().contains("./missing"));

        let err = BuildError::Configuration("no entries".to_string());
        assert_eq!(err.kind(), "configuration");
        assert!(err.path().is_none());
    }
}
