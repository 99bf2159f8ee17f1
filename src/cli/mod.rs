//! Command-line interface for Forgepack
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `build`: One-shot production bundle
//! - `watch`: Rebuild on file changes

mod build;
mod watch;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::error::BuildError;

pub use build::{BuildCommand, BuildOptions, Mode};
pub use watch::WatchCommand;

/// Forgepack - a small module bundler for the web
#[derive(Parser, Debug)]
#[command(name = "forgepack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to forgepack.toml config file
    #[arg(short, long, global = true, default_value = "forgepack.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bundle the project once and exit
    Build(BuildCommand),

    /// Rebuild whenever source files change
    Watch(WatchCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Build(cmd) => cmd.execute(&self.config).await,
            Commands::Watch(cmd) => cmd.execute(&self.config).await,
        }
    }
}

/// Print the Forgepack banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "📦".cyan(),
        "Forgepack".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}

/// Print a structured error list, one line per error
pub(crate) fn report_errors(errors: &[BuildError]) {
    for err in errors {
        match err.path() {
            Some(path) => eprintln!(
                "  {} {} {}: {}",
                "✗".red(),
                format!("[{}]", err.kind()).yellow(),
                path.display().to_string().dimmed(),
                err
            ),
            None => eprintln!("  {} {} {}", "✗".red(), format!("[{}]", err.kind()).yellow(), err),
        }
    }
}
