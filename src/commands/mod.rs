pub mod autopsy;
pub mod crawl;
pub mod generate;
pub mod probe;
pub mod search;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::path::Path;

use obscura::config::Config;
use obscura::engine::{Cancellation, DiscoveryEngine};
use obscura::search::SourceReport;

// Re-export command functions for convenience
pub use autopsy::autopsy;
pub use crawl::crawl;
pub use generate::{generate, GenerateParams};
pub use probe::probe;
pub use search::{search, SearchParams};

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Load configuration from `path`, or from the environment when unset
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env().context("Failed to load configuration from environment"),
    }
}

/// Build the engine from configuration, with an optional seed override
pub fn build_engine(config: Config, seed: Option<u64>) -> Result<DiscoveryEngine> {
    let builder = DiscoveryEngine::builder(config);
    let builder = match seed {
        Some(seed) => builder.with_seed(seed),
        None => builder,
    };
    builder.build().context("Failed to build discovery engine")
}

/// Cancellation that fires on Ctrl-C
pub fn cancel_on_ctrl_c() -> Cancellation {
    let cancellation = Cancellation::new();
    let trigger = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, returning collected results");
            trigger.cancel();
        }
    });
    cancellation
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

pub fn print_reports(reports: &[SourceReport]) {
    for report in reports {
        let state = match &report.last_error {
            Some(e) if report.answered == 0 => format!("failed: {e}"),
            Some(e) => format!("degraded: {e}"),
            None => "ok".to_string(),
        };
        println!(
            "  {:<8} fetched {:>4}  kept {:>4}  {state}",
            report.source.as_str(),
            report.fetched,
            report.kept
        );
    }
}
