use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use obscura::engine::DiscoveryEngine;
use obscura::models::{Query, ScoredRecord, SortKey, SourceKind};
use obscura::utils::truncate_text;

use super::{cancel_on_ctrl_c, print_json, print_reports, OutputFormat};

/// Search options collected from the command line
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query: String,
    pub max_views: Option<u64>,
    pub exact_zero: bool,
    pub ghost: bool,
    pub patterns: Vec<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub min_age_days: Option<u32>,
    pub title_contains: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub sources: Vec<String>,
}

impl SearchParams {
    fn build_query(&self) -> Result<Query> {
        let mut query = Query::new(self.query.clone());
        if let Some(max_views) = self.max_views {
            query = query.with_max_views(max_views);
        }
        if self.exact_zero {
            query = query.with_exact_zero();
        }
        if self.ghost {
            query = query.with_ghost_only();
        }
        if !self.patterns.is_empty() {
            query = query.with_patterns(self.patterns.iter().cloned());
        }
        // `--to` names the last day included
        let from = self.from.and_then(midnight);
        let to = self.to.and_then(|d| d.succ_opt()).and_then(midnight);
        query = query.with_date_range(from, to);
        if let Some(days) = self.min_age_days {
            query = query.with_min_age_days(days);
        }
        if let Some(needle) = &self.title_contains {
            query = query.with_title_contains(needle.clone());
        }
        if let Some(sort) = &self.sort {
            let key: SortKey = sort.parse().map_err(anyhow::Error::msg)?;
            query = query.with_sort(key);
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        Ok(query)
    }
}

fn midnight(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn parse_sources(names: &[String]) -> Result<Vec<SourceKind>> {
    names
        .iter()
        .flat_map(|name| name.split(','))
        .filter(|name| !name.trim().is_empty())
        .map(|name| name.parse::<SourceKind>().map_err(anyhow::Error::msg))
        .collect()
}

pub async fn search(
    engine: &DiscoveryEngine,
    params: SearchParams,
    format: OutputFormat,
) -> Result<()> {
    let query = params.build_query()?;
    let sources = parse_sources(&params.sources)?;
    let cancellation = cancel_on_ctrl_c();

    let outcome = engine
        .search(&query, &sources, cancellation.token())
        .await
        .context("Search failed")?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => {
            println!("Search: \"{}\"", query.text);
            println!("================================");
            print_reports(&outcome.reports);
            print_results(&outcome.results);
            println!("\nStatus: {}", outcome.status.label());
        }
    }
    Ok(())
}

pub fn print_results(results: &[ScoredRecord]) {
    if results.is_empty() {
        println!("\nNo results");
        return;
    }

    println!("\nFound {} results:\n", results.len());
    for (i, scored) in results.iter().enumerate() {
        let record = &scored.record;
        println!(
            "{:>3}. [{:>3}] {} ({} views, {})",
            i + 1,
            scored.obscurity_score,
            truncate_text(&record.title, 70),
            record.view_count,
            record.source
        );
        if let Some(at) = record.uploaded_at {
            println!("       Uploaded: {}", at.format("%Y-%m-%d %H:%M"));
        }
        if !scored.flags.is_empty() {
            println!("       Flags: {}", scored.flags.join(", "));
        }
        println!("       URL: {}", record.url());
    }
}
