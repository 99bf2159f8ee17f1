//! Forgepack library
//!
//! Core functionality for the Forgepack bundler.

pub mod bundler;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod resolver;
pub mod transform;
pub mod utils;

pub use bundler::Bundler;
pub use cli::Cli;
pub use config::Config;
pub use error::BuildError;
