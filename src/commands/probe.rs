use anyhow::{Context, Result};

use obscura::engine::DiscoveryEngine;
use obscura::models::CandidateId;
use obscura::probe::ProbeMode;

use super::search::print_results;
use super::{cancel_on_ctrl_c, print_json, OutputFormat};

/// Random guesses when `seed` is unset, neighbor scan around it otherwise
pub async fn probe(
    engine: &DiscoveryEngine,
    seed: Option<String>,
    count: usize,
    format: OutputFormat,
) -> Result<()> {
    let mode = match seed {
        Some(seed) => ProbeMode::Neighbors {
            seed: CandidateId::parse(&seed).context("Invalid seed ID")?,
            k: count,
        },
        None => ProbeMode::Random { count },
    };

    let cancellation = cancel_on_ctrl_c();
    let outcome = engine
        .brute_force(mode, cancellation.token())
        .await
        .context("Probe failed")?;

    if format == OutputFormat::Json {
        return print_json(&outcome);
    }

    println!("Probe ({})", outcome.mode);
    println!("================================");
    println!("  Candidates: {}", outcome.candidates);
    println!("  Misses:     {}", outcome.misses);
    println!("  Unverified: {}", outcome.unverified);

    let hits: Vec<_> = outcome
        .hits
        .into_iter()
        .map(|record| engine.score(record))
        .collect();
    print_results(&hits);
    println!("\nStatus: {}", outcome.status.label());
    Ok(())
}
