mod commands;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{GenerateParams, OutputFormat, SearchParams};
use obscura::query::{RabbitHoleSeed, DEFAULT_RABBIT_HOLE_CAP};

#[derive(Parser)]
#[command(
    name = "obscura",
    version,
    about = "Discovery engine for low-visibility and unindexed media",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML). Environment variables are used when unset
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Seed for reproducible generation and probing
    #[arg(long, global = true)]
    rng_seed: Option<u64>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, global = true, default_value = "false")]
    metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search all enabled sources and rank by obscurity
    Search {
        /// Search text
        query: String,

        /// Keep records with at most this many views
        #[arg(long)]
        max_views: Option<u64>,

        /// Keep only records with zero views
        #[arg(long, default_value = "false")]
        exact_zero: bool,

        /// Keep only ghost uploads (views at or under the ghost ceiling)
        #[arg(long, default_value = "false")]
        ghost: bool,

        /// Raw filename prefix, repeatable (IMG_, DSC_, ...)
        #[arg(short, long = "pattern")]
        patterns: Vec<String>,

        /// Earliest upload day (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last upload day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Minimum age in days
        #[arg(long)]
        min_age_days: Option<u32>,

        /// Case-insensitive title substring
        #[arg(long)]
        title_contains: Option<String>,

        /// Sort key (obscurity, views, date, relevance)
        #[arg(short, long)]
        sort: Option<String>,

        /// Results requested from each source
        #[arg(short, long)]
        limit: Option<usize>,

        /// Sources to query (api, scrape, archive); all enabled when unset
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
    },

    /// Walk the related-content graph from a seed video
    Crawl {
        /// Seed video ID
        seed: String,

        /// Maximum hops from the seed
        #[arg(short, long, default_value = "2")]
        depth: u32,

        /// Related items followed per node
        #[arg(long, default_value = "5")]
        per_hop: usize,
    },

    /// Verify generated video IDs against a source
    Probe {
        #[command(subcommand)]
        mode: ProbeCommand,
    },

    /// Fingerprint a channel's upload cadence
    Autopsy {
        /// Channel ID
        channel_id: String,
    },

    /// Generate discovery queries, optionally running them
    Generate {
        #[command(subcommand)]
        strategy: GenerateCommand,

        /// Run the generated queries as one search batch
        #[arg(long, global = true, default_value = "false")]
        run: bool,

        /// Sources used with --run
        #[arg(long, global = true, value_delimiter = ',')]
        sources: Vec<String>,
    },

    /// Show remaining quota and breaker state per source
    Quota,
}

#[derive(Subcommand)]
enum ProbeCommand {
    /// Uniformly random IDs
    Random {
        #[arg(short, long, default_value = "50")]
        count: usize,
    },

    /// IDs numerically adjacent to a seed
    Neighbors {
        /// Seed video ID
        seed: String,

        /// Neighbors on each side
        #[arg(short, long, default_value = "10")]
        k: usize,
    },
}

#[derive(Subcommand)]
enum GenerateCommand {
    /// Camera filenames, device names and odd glyphs
    Chaos {
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Short historical date windows
    TimeTravel {
        #[arg(short, long, default_value = "5")]
        count: usize,
    },

    /// Queries derived from a seed record's metadata
    RabbitHole {
        /// Tag, repeatable
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        channel: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Maximum queries produced
        #[arg(long, default_value_t = DEFAULT_RABBIT_HOLE_CAP)]
        cap: usize,
    },

    /// Queries scoped to a single day
    TimeCapsule {
        /// Day to capture; random when unset
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Filename-prefix restricted searches
    Pattern {
        /// Prefix, repeatable; all known prefixes when unset
        #[arg(short, long = "prefix")]
        prefixes: Vec<String>,

        /// Extra keywords appended to each prefix
        #[arg(short, long, default_value = "")]
        keywords: String,
    },

    /// Keyword and pattern combinations with booster words
    Build {
        keywords: String,

        #[arg(short, long = "pattern")]
        patterns: Vec<String>,

        /// Booster words appended
        #[arg(short, long, default_value = "3")]
        boosters: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = obscura::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    tracing::info!("obscura starting");

    let engine = commands::build_engine(config, cli.rng_seed)?;
    let format = cli.format;

    match cli.command {
        Commands::Search {
            query,
            max_views,
            exact_zero,
            ghost,
            patterns,
            from,
            to,
            min_age_days,
            title_contains,
            sort,
            limit,
            sources,
        } => {
            tracing::info!(
                query = %query,
                max_views = ?max_views,
                exact_zero = %exact_zero,
                sources = ?sources,
                "Starting search command"
            );
            let params = SearchParams {
                query,
                max_views,
                exact_zero,
                ghost,
                patterns,
                from,
                to,
                min_age_days,
                title_contains,
                sort,
                limit,
                sources,
            };
            commands::search(&engine, params, format).await?;
        }

        Commands::Crawl {
            seed,
            depth,
            per_hop,
        } => {
            tracing::info!(
                seed = %seed,
                depth = %depth,
                per_hop = %per_hop,
                "Starting crawl command"
            );
            commands::crawl(&engine, seed, depth, per_hop, format).await?;
        }

        Commands::Probe { mode } => {
            let (seed, count) = match mode {
                ProbeCommand::Random { count } => (None, count),
                ProbeCommand::Neighbors { seed, k } => (Some(seed), k),
            };
            tracing::info!(seed = ?seed, count = %count, "Starting probe command");
            commands::probe(&engine, seed, count, format).await?;
        }

        Commands::Autopsy { channel_id } => {
            tracing::info!(channel_id = %channel_id, "Starting autopsy command");
            commands::autopsy(&engine, channel_id, format).await?;
        }

        Commands::Generate {
            strategy,
            run,
            sources,
        } => {
            let params = match strategy {
                GenerateCommand::Chaos { count } => GenerateParams::Chaos { count },
                GenerateCommand::TimeTravel { count } => GenerateParams::TimeTravel { count },
                GenerateCommand::RabbitHole {
                    tags,
                    title,
                    channel,
                    description,
                    cap,
                } => GenerateParams::RabbitHole {
                    seed: RabbitHoleSeed {
                        tags,
                        title,
                        channel,
                        description,
                    },
                    cap,
                },
                GenerateCommand::TimeCapsule { date } => GenerateParams::TimeCapsule { date },
                GenerateCommand::Pattern { prefixes, keywords } => {
                    GenerateParams::Pattern { prefixes, keywords }
                }
                GenerateCommand::Build {
                    keywords,
                    patterns,
                    boosters,
                } => GenerateParams::Build {
                    keywords,
                    patterns,
                    boosters,
                },
            };
            tracing::info!(params = ?params, run = %run, "Starting generate command");
            commands::generate(&engine, params, run, sources, format).await?;
        }

        Commands::Quota => {
            let snapshots = engine.quota_snapshot().await;
            match format {
                OutputFormat::Json => commands::print_json(&snapshots)?,
                OutputFormat::Text => {
                    for snapshot in snapshots {
                        println!(
                            "{:<8} {:>6}/{:<6} resets {}  breaker {}",
                            snapshot.source.as_str(),
                            snapshot.units_remaining,
                            snapshot.ceiling,
                            snapshot.window_reset_at.format("%Y-%m-%d %H:%M:%S"),
                            snapshot.breaker
                        );
                    }
                }
            }
        }
    }

    if cli.metrics {
        match obscura::metrics::encode_metrics() {
            Ok(text) => eprintln!("{text}"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    tracing::info!("obscura completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("obscura=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new(format!("obscura={level},warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
