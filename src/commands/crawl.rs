use anyhow::{Context, Result};

use obscura::engine::DiscoveryEngine;

use super::{cancel_on_ctrl_c, print_json, OutputFormat};

pub async fn crawl(
    engine: &DiscoveryEngine,
    seed: String,
    depth: u32,
    per_hop: usize,
    format: OutputFormat,
) -> Result<()> {
    let cancellation = cancel_on_ctrl_c();
    let outcome = engine
        .crawl(&seed, depth, per_hop, cancellation.token())
        .await
        .context("Crawl failed")?;

    if format == OutputFormat::Json {
        return print_json(&outcome);
    }

    println!("Crawl from {seed} (depth {depth}, {per_hop} per hop)");
    println!("================================");
    for node in &outcome.nodes {
        let indent = "  ".repeat(node.depth as usize);
        match &node.parent {
            Some(parent) => println!("{indent}{} <- {parent}", node.id),
            None => println!("{indent}{}", node.id),
        }
    }

    if !outcome.failures.is_empty() {
        println!("\nAbandoned branches:");
        for failure in &outcome.failures {
            println!("  {} (depth {}): {}", failure.node, failure.depth, failure.error);
        }
    }
    if outcome.capped {
        println!("\nStopped at the node ceiling");
    }
    println!(
        "\nVisited {} nodes, {} edges. Status: {}",
        outcome.nodes.len(),
        outcome.edges.len(),
        outcome.status.label()
    );
    Ok(())
}
