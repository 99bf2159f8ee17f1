//! Watch command implementation
//!
//! Long-running mode: build once, then rebuild whenever source files change.
//! Rebuild failures are reported and the loop keeps running; artifacts from
//! the last good build stay on disk untouched.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tracing::{error, info};

use crate::bundler::Bundler;
use crate::config::Config;
use crate::utils;

use super::build::Mode;
use super::{report_errors, BuildOptions};

/// Rebuild on file changes
#[derive(Args, Debug)]
pub struct WatchCommand {
    /// Output directory (overrides [output] dir from forgepack.toml)
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Build mode
    #[arg(long, value_enum, default_value_t = Mode::Development)]
    pub mode: Mode,

    /// Worker threads for module loading and transformation
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

impl WatchCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        info!("Loading configuration from {}", config_path);
        let config = Config::load(config_path)?;
        let root = config.root.clone();
        let output_dir = self
            .outdir
            .clone()
            .unwrap_or_else(|| config.output_dir());
        let cache_dir = config.cache_dir();
        let debounce = Duration::from_millis(config.watch.debounce_ms);

        let options = BuildOptions {
            outdir: self.outdir.clone(),
            mode: self.mode,
            jobs: self.jobs,
            // Watch mode keeps serving whatever still builds
            best_effort: true,
        };
        let bundler = Bundler::new(config, options)?;

        run_build(&bundler).await;

        // Debounced events arrive on a std channel from the notify thread;
        // a forwarder thread bridges them onto a tokio channel
        let (raw_tx, raw_rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(debounce, raw_tx)?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<PathBuf>>();
        std::thread::spawn(move || {
            // Keep the debouncer alive for the duration of the watcher
            let _debouncer = debouncer;

            loop {
                match raw_rx.recv() {
                    Ok(Ok(events)) => {
                        let paths: Vec<PathBuf> =
                            events.into_iter().map(|event| event.path).collect();
                        if tx.send(paths).is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        error!("Watch error: {:?}", e);
                    }
                    Err(_) => {
                        // Channel closed, exit
                        break;
                    }
                }
            }
        });

        eprintln!(
            "{} Watching {} for changes (Ctrl+C to stop)\n",
            "👀".cyan(),
            root.display().to_string().dimmed()
        );

        loop {
            tokio::select! {
                batch = rx.recv() => {
                    let Some(mut paths) = batch else { break };
                    // Coalesce everything already queued into one rebuild
                    while let Ok(more) = rx.try_recv() {
                        paths.extend(more);
                    }

                    paths.retain(|p| is_relevant(p, &output_dir, cache_dir.as_deref()));
                    paths.sort();
                    paths.dedup();
                    if paths.is_empty() {
                        continue;
                    }

                    for path in &paths {
                        eprintln!(
                            "  {} File changed: {}",
                            "↻".yellow(),
                            path.display().to_string().dimmed()
                        );
                    }

                    bundler.invalidate(&paths);
                    run_build(&bundler).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("\n{} Watch stopped", "✓".green());
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Outputs and cache writes must not retrigger builds
fn is_relevant(path: &std::path::Path, output_dir: &std::path::Path, cache_dir: Option<&std::path::Path>) -> bool {
    if path.starts_with(output_dir) {
        return false;
    }
    if let Some(cache_dir) = cache_dir {
        if path.starts_with(cache_dir) {
            return false;
        }
    }
    true
}

/// Run one build and report the outcome without ever exiting the watcher
async fn run_build(bundler: &Bundler) {
    let start = std::time::Instant::now();
    match bundler.build().await {
        Ok(result) => {
            eprintln!(
                "{} Emitted {} chunk(s) from {} module(s) in {}",
                "✓".green().bold(),
                result.artifacts.len(),
                result.module_count,
                utils::format_duration(start.elapsed())
            );
            if !result.errors.is_empty() {
                report_errors(&result.errors);
            }
        }
        Err(errors) => {
            eprintln!("{} Build failed:", "✗".red().bold());
            report_errors(&errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_and_cache_paths_ignored() {
        let out = PathBuf::from("/app/dist");
        let cache = PathBuf::from("/app/.forgepack-cache");

        assert!(!is_relevant(&out.join("main.abc.js"), &out, Some(&cache)));
        assert!(!is_relevant(&cache.join("index.json"), &out, Some(&cache)));
        assert!(is_relevant(std::path::Path::new("/app/src/index.js"), &out, Some(&cache)));
    }
}
