use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use obscura::engine::DiscoveryEngine;
use obscura::models::Query;
use obscura::query::{RabbitHoleSeed, BOOSTER_WORDS, DEFAULT_CHAOS_COUNT};

use super::search::{parse_sources, print_results};
use super::{cancel_on_ctrl_c, print_json, print_reports, OutputFormat};

/// Generation strategy and its inputs
#[derive(Debug, Clone)]
pub enum GenerateParams {
    Chaos {
        count: Option<usize>,
    },
    TimeTravel {
        count: usize,
    },
    RabbitHole {
        seed: RabbitHoleSeed,
        cap: usize,
    },
    TimeCapsule {
        date: Option<NaiveDate>,
    },
    Pattern {
        prefixes: Vec<String>,
        keywords: String,
    },
    Build {
        keywords: String,
        patterns: Vec<String>,
        boosters: usize,
    },
}

fn queries(engine: &DiscoveryEngine, params: GenerateParams) -> Result<Vec<Query>> {
    let mut generator = engine.generator();
    let max = engine.config().engine.max_generated_queries;

    let queries = match params {
        GenerateParams::Chaos { count } => {
            generator.chaos(count.unwrap_or(DEFAULT_CHAOS_COUNT))?
        }
        GenerateParams::TimeTravel { count } => {
            if count == 0 || count > max {
                bail!("requested {count} queries, allowed 1..={max}");
            }
            (0..count).map(|_| generator.time_travel()).collect()
        }
        GenerateParams::RabbitHole { seed, cap } => generator.rabbit_hole(&seed, cap)?,
        GenerateParams::TimeCapsule { date } => {
            let date = date.unwrap_or_else(|| generator.random_capsule_date());
            generator.time_capsule(date)
        }
        GenerateParams::Pattern { prefixes, keywords } => {
            let prefixes: Vec<&str> = prefixes.iter().map(String::as_str).collect();
            generator.pattern_restricted(&prefixes, &keywords)?
        }
        GenerateParams::Build {
            keywords,
            patterns,
            boosters,
        } => {
            let patterns: Vec<&str> = patterns.iter().map(String::as_str).collect();
            let boosters = &BOOSTER_WORDS[..boosters.min(BOOSTER_WORDS.len())];
            let mut texts = obscura::query::QueryGenerator::build_queries(&keywords, &patterns, boosters);
            texts.truncate(max);
            texts.into_iter().map(Query::new).collect()
        }
    };
    Ok(queries)
}

/// Print generated queries, or run them as one deduplicated search batch
pub async fn generate(
    engine: &DiscoveryEngine,
    params: GenerateParams,
    run: bool,
    sources: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let queries = queries(engine, params)?;

    if !run {
        if format == OutputFormat::Json {
            return print_json(&queries);
        }
        for query in &queries {
            let mut line = query.text.clone();
            if let (Some(from), Some(to)) = (query.filters.date_from, query.filters.date_to) {
                line.push_str(&format!(
                    "  [{} .. {})",
                    from.format("%Y-%m-%d"),
                    to.format("%Y-%m-%d")
                ));
            }
            if !query.filters.filename_patterns.is_empty() {
                let patterns: Vec<&str> = query
                    .filters
                    .filename_patterns
                    .iter()
                    .map(String::as_str)
                    .collect();
                line.push_str(&format!("  prefix {}", patterns.join("|")));
            }
            println!("{line}");
        }
        return Ok(());
    }

    let sources = parse_sources(&sources)?;
    let cancellation = cancel_on_ctrl_c();
    let outcome = engine
        .search_many(&queries, &sources, cancellation.token())
        .await
        .context("Generated search failed")?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => {
            println!("Ran {} generated queries", queries.len());
            println!("================================");
            print_reports(&outcome.reports);
            print_results(&outcome.results);
            println!("\nStatus: {}", outcome.status.label());
        }
    }
    Ok(())
}
