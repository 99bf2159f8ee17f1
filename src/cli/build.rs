//! Build command implementation

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::Colorize;
use tracing::info;

use crate::bundler::Bundler;
use crate::config::Config;
use crate::utils;

use super::report_errors;

/// Build mode; selects output-hash length and is mixed into the transform
/// configuration hash so switching modes never reuses stale cache entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }

    /// Hex digits of the content hash kept in emitted filenames
    pub fn hash_len(&self) -> usize {
        match self {
            Mode::Development => 8,
            Mode::Production => 16,
        }
    }
}

/// Bundle the project once and exit
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Output directory (overrides [output] dir from forgepack.toml)
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Build mode
    #[arg(long, value_enum, default_value_t = Mode::Production)]
    pub mode: Mode,

    /// Worker threads for module loading and transformation
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Keep going after per-module errors, emitting unaffected chunks
    #[arg(long)]
    pub best_effort: bool,
}

impl BuildCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let start = Instant::now();

        info!("Loading configuration from {}", config_path);
        let config = Config::load(config_path)?;

        eprintln!("{} Bundling ({})...", "→".blue(), self.mode.as_str());

        let bundler = Bundler::new(config, self.into())?;
        match bundler.build().await {
            Ok(result) => {
                eprintln!(
                    "\n{} Emitted {} chunk(s) from {} module(s) in {} ({} cache hit(s))\n",
                    "✓".green().bold(),
                    result.artifacts.len(),
                    result.module_count,
                    utils::format_duration(start.elapsed()),
                    result.cache_hits
                );

                for artifact in &result.artifacts {
                    eprintln!(
                        "  {} {} {}",
                        "•".dimmed(),
                        artifact.path.display().to_string().cyan(),
                        utils::format_size(artifact.size).dimmed()
                    );
                }
                eprintln!();

                if !result.errors.is_empty() {
                    report_errors(&result.errors);
                    anyhow::bail!(
                        "build finished with {} error(s); affected chunks were withheld",
                        result.errors.len()
                    );
                }
                Ok(())
            }
            Err(errors) => {
                report_errors(&errors);
                anyhow::bail!("build failed with {} error(s)", errors.len())
            }
        }
    }
}

/// Build options derived from command arguments
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub outdir: Option<PathBuf>,
    pub mode: Mode,
    pub jobs: Option<usize>,
    pub best_effort: bool,
}

impl From<&BuildCommand> for BuildOptions {
    fn from(cmd: &BuildCommand) -> Self {
        Self {
            outdir: cmd.outdir.clone(),
            mode: cmd.mode,
            jobs: cmd.jobs,
            best_effort: cmd.best_effort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_hash_lengths() {
        assert_eq!(Mode::Development.hash_len(), 8);
        assert_eq!(Mode::Production.hash_len(), 16);
        assert_eq!(Mode::Production.as_str(), "production");
    }
}
