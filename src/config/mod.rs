//! Configuration management for the obscura engine
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files. Credentials are never stored here: the API source only names the
//! environment variable its key is read from.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::autopsy::AutopsyThresholds;
use crate::models::SourceKind;
use crate::quota::CostTable;
use crate::scoring::ScoringWeights;
use crate::utils::retry::RetryConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine-wide ceilings and timeouts
    pub engine: EngineConfig,

    /// Transport settings per source
    pub sources: SourcesConfig,

    /// Unit budgets and request rates per source
    pub quota: QuotaConfig,

    /// Circuit breaker policy shared by all sources
    pub breaker: BreakerConfig,

    /// Local retry policy for transient failures
    pub retry: RetryConfig,

    /// Obscurity score weights
    pub scoring: ScoringWeights,

    /// Channel autopsy thresholds
    pub autopsy: AutopsyThresholds,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Engine-wide ceilings, timeouts and seed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size for one fan-out
    pub max_workers: usize,

    /// Timeout for a single external call in seconds
    pub call_timeout_secs: u64,

    /// Longest a caller will wait on a rate-limited permit, in seconds
    pub max_permit_wait_secs: u64,

    /// Records collected per source per query (bounds deep paging)
    pub max_results_per_source: usize,

    /// Queries a generator call may emit
    pub max_generated_queries: usize,

    /// Deepest allowed crawl
    pub max_crawl_depth: u32,

    /// Widest allowed crawl hop
    pub max_per_hop: usize,

    /// Candidates verified by one brute-force run
    pub max_probe_batch: usize,

    /// Fixed seed for generators and probes; random when unset
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            call_timeout_secs: 20,
            max_permit_wait_secs: 10,
            max_results_per_source: 200,
            max_generated_queries: 50,
            max_crawl_depth: 5,
            max_per_hop: 20,
            max_probe_batch: 500,
            seed: None,
        }
    }
}

/// Transport settings for one HTTP source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Whether the source takes part in searches by default
    pub enabled: bool,

    /// Base URL (overridable for tests and mirrors)
    pub base_url: String,

    /// User agent string
    pub user_agent: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Environment variable holding the opaque API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl HttpSourceConfig {
    fn new(base_url: &str) -> Self {
        Self {
            enabled: true,
            base_url: base_url.to_string(),
            user_agent: format!("obscura/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 15,
            api_key_env: None,
        }
    }

    /// Request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Transport settings for every source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub api: HttpSourceConfig,
    pub scrape: HttpSourceConfig,
    pub archive: HttpSourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let mut api = HttpSourceConfig::new("https://www.googleapis.com/youtube/v3");
        api.api_key_env = Some(String::from("YOUTUBE_API_KEY"));

        let mut scrape = HttpSourceConfig::new("https://www.youtube.com");
        scrape.user_agent = String::from(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/126.0 Safari/537.36",
        );

        Self {
            api,
            scrape,
            archive: HttpSourceConfig::new("https://archive.org"),
        }
    }
}

impl SourcesConfig {
    /// Settings for one source
    pub fn get(&self, kind: SourceKind) -> &HttpSourceConfig {
        match kind {
            SourceKind::Api => &self.api,
            SourceKind::Scrape => &self.scrape,
            SourceKind::Archive => &self.archive,
        }
    }

    /// Sources enabled by default, in merge order
    pub fn enabled(&self) -> Vec<SourceKind> {
        SourceKind::all()
            .into_iter()
            .filter(|kind| self.get(*kind).enabled)
            .collect()
    }
}

/// Unit budget and request rate for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceQuotaConfig {
    /// Length of the fixed accounting window in seconds
    pub window_secs: u64,

    /// Hard unit ceiling per window
    pub window_units: u64,

    /// Token-bucket refill rate
    pub requests_per_second: u32,

    /// Token-bucket burst size
    pub burst: u32,

    /// Unit cost per operation kind
    pub costs: CostTable,
}

/// Budgets for every source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub api: SourceQuotaConfig,
    pub scrape: SourceQuotaConfig,
    pub archive: SourceQuotaConfig,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            api: SourceQuotaConfig {
                window_secs: 86_400,
                window_units: 10_000,
                requests_per_second: 5,
                burst: 5,
                costs: CostTable::api(),
            },
            scrape: SourceQuotaConfig {
                window_secs: 86_400,
                window_units: 5_000,
                requests_per_second: 1,
                burst: 1,
                costs: CostTable::flat(1),
            },
            archive: SourceQuotaConfig {
                window_secs: 86_400,
                window_units: 10_000,
                requests_per_second: 2,
                burst: 2,
                costs: CostTable::flat(1),
            },
        }
    }
}

impl QuotaConfig {
    /// Budget settings for one source
    pub fn get(&self, kind: SourceKind) -> &SourceQuotaConfig {
        match kind {
            SourceKind::Api => &self.api,
            SourceKind::Scrape => &self.scrape,
            SourceKind::Archive => &self.archive,
        }
    }
}

/// Circuit breaker policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive throttled responses that open the breaker
    pub failure_threshold: u32,

    /// First cool-down in seconds
    pub base_backoff_secs: u64,

    /// Cool-down ceiling in seconds
    pub max_backoff_secs: u64,

    /// Age in seconds after which an unanswered half-open probe is abandoned
    pub probe_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_backoff_secs: 30,
            max_backoff_secs: 900,
            probe_timeout_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Unset or unparseable variables fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let engine = &mut config.engine;
        engine.max_workers = env_or("OBSCURA_MAX_WORKERS", engine.max_workers);
        engine.call_timeout_secs = env_or("OBSCURA_CALL_TIMEOUT", engine.call_timeout_secs);
        engine.max_permit_wait_secs =
            env_or("OBSCURA_MAX_PERMIT_WAIT", engine.max_permit_wait_secs);
        engine.max_results_per_source =
            env_or("OBSCURA_MAX_RESULTS_PER_SOURCE", engine.max_results_per_source);
        engine.seed = std::env::var("OBSCURA_SEED")
            .ok()
            .and_then(|v| v.parse::<u64>().ok());

        let sources = &mut config.sources;
        if let Ok(url) = std::env::var("OBSCURA_API_BASE_URL") {
            sources.api.base_url = url;
        }
        if let Ok(url) = std::env::var("OBSCURA_SCRAPE_BASE_URL") {
            sources.scrape.base_url = url;
        }
        if let Ok(url) = std::env::var("OBSCURA_ARCHIVE_BASE_URL") {
            sources.archive.base_url = url;
        }
        if let Ok(var) = std::env::var("OBSCURA_API_KEY_ENV") {
            sources.api.api_key_env = Some(var);
        }
        if let Ok(list) = std::env::var("OBSCURA_SOURCES") {
            let enabled = list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(SourceKind::from_str)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(anyhow::Error::msg)
                .context("Invalid OBSCURA_SOURCES")?;
            for kind in SourceKind::all() {
                let enabled_now = enabled.contains(&kind);
                match kind {
                    SourceKind::Api => sources.api.enabled = enabled_now,
                    SourceKind::Scrape => sources.scrape.enabled = enabled_now,
                    SourceKind::Archive => sources.archive.enabled = enabled_now,
                }
            }
        }

        config.quota.api.window_units =
            env_or("OBSCURA_API_DAILY_UNITS", config.quota.api.window_units);
        config.quota.scrape.window_units =
            env_or("OBSCURA_SCRAPE_DAILY_UNITS", config.quota.scrape.window_units);

        if let Ok(level) = std::env::var("OBSCURA_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("OBSCURA_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.max_workers == 0 {
            anyhow::bail!("engine.max_workers must be greater than 0");
        }
        if engine.call_timeout_secs == 0 {
            anyhow::bail!("engine.call_timeout_secs must be greater than 0");
        }
        if engine.max_results_per_source == 0 {
            anyhow::bail!("engine.max_results_per_source must be greater than 0");
        }
        if engine.max_generated_queries == 0 {
            anyhow::bail!("engine.max_generated_queries must be greater than 0");
        }
        if engine.max_per_hop == 0 || engine.max_probe_batch == 0 {
            anyhow::bail!("engine.max_per_hop and engine.max_probe_batch must be greater than 0");
        }

        for kind in SourceKind::all() {
            let quota = self.quota.get(kind);
            if quota.window_secs == 0 || quota.window_units == 0 {
                anyhow::bail!("quota.{kind} window and units must be greater than 0");
            }
            if quota.requests_per_second == 0 || quota.burst == 0 {
                anyhow::bail!("quota.{kind} requests_per_second and burst must be greater than 0");
            }
            if quota.costs.max_cost() == 0 {
                anyhow::bail!("quota.{kind} operation costs must be greater than 0");
            }
            let source = self.sources.get(kind);
            if source.base_url.trim().is_empty() {
                anyhow::bail!("sources.{kind}.base_url must not be empty");
            }
            url::Url::parse(&source.base_url)
                .with_context(|| format!("sources.{kind}.base_url is not a valid URL"))?;
        }

        if self.breaker.failure_threshold == 0 {
            anyhow::bail!("breaker.failure_threshold must be greater than 0");
        }
        if self.breaker.base_backoff_secs == 0
            || self.breaker.base_backoff_secs > self.breaker.max_backoff_secs
        {
            anyhow::bail!("breaker.base_backoff_secs must be in 1..=max_backoff_secs");
        }
        if self.breaker.probe_timeout_secs == 0 {
            anyhow::bail!("breaker.probe_timeout_secs must be greater than 0");
        }

        self.scoring.validate().map_err(anyhow::Error::msg)?;
        self.autopsy.validate().map_err(anyhow::Error::msg)?;

        Ok(())
    }

    /// Per-call timeout as Duration
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.call_timeout_secs)
    }

    /// Longest permit wait as Duration
    #[must_use]
    pub fn max_permit_wait(&self) -> Duration {
        Duration::from_secs(self.engine.max_permit_wait_secs)
    }
}
