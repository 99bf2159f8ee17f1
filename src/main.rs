//! Forgepack - a small module bundler for the web
//!
//! Walks the import graph from configured entry points, runs each module
//! through a configurable transform pipeline, splits the graph into chunks
//! at dynamic-import boundaries, and emits content-hashed artifacts with a
//! manifest.
//!
//! # Features
//! - CommonJS `require()` and dynamic `import()` dependency scanning
//! - Node-style resolution with extension and directory-index probing
//! - Shared and vendor chunk extraction
//! - Persistent transform cache and watch mode

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod bundler;
mod cache;
mod cli;
mod config;
mod error;
mod resolver;
mod transform;
mod utils;

pub use bundler::Bundler;
pub use cli::Cli;
pub use config::Config;

/// Initialize the logging/tracing system
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forgepack=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forgepack=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    cli.execute().await
}
