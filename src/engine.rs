//! Discovery engine facade
//!
//! [`DiscoveryEngine`] owns the shared pieces (clock, rate limiter, governed sources,
//! scorer and autopsy thresholds) and exposes the four operations: search, crawl,
//! brute-force probing and channel autopsy. Everything that reaches the network goes
//! through the same [`RateLimiter`], so concurrent operations share one budget per
//! source.
//!
//! # Example
//!
//! ```no_run
//! use obscura::config::Config;
//! use obscura::engine::{Cancellation, DiscoveryEngine};
//! use obscura::models::Query;
//!
//! #[tokio::main]
//! async fn main() -> obscura::error::Result<()> {
//!     let engine = DiscoveryEngine::builder(Config::default()).build()?;
//!     let cancellation = Cancellation::new();
//!     let query = Query::new("VHS tape").with_max_views(10);
//!     let outcome = engine.search(&query, &[], cancellation.token()).await?;
//!     println!("{} results ({})", outcome.results.len(), outcome.status.label());
//!     Ok(())
//! }
//! ```

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::autopsy::ChannelAutopsy;
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::crawler::{CrawlEngine, CrawlOutcome};
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{
    CandidateId, ChannelFingerprint, MediaRecord, Query, ScoredRecord, SourceKind,
};
use crate::probe::{BruteForceProber, ProbeMode, ProbeOutcome};
use crate::query::QueryGenerator;
use crate::quota::{OperationKind, QuotaSnapshot, RateLimiter};
use crate::scoring::{anomalies, ObscurityScorer};
use crate::search::{SearchOrchestrator, SearchOutcome};
use crate::sources::{
    ApiSource, ArchiveSource, CredentialProvider, EnvCredentials, GovernedSource,
    GovernorSettings, ScrapeSource, SharedSource,
};

pub use crate::operation::{CancelToken, Cancellation, OperationStatus};

/// Source preference for related-content crawls
const CRAWL_PREFERENCE: [SourceKind; 2] = [SourceKind::Scrape, SourceKind::Api];

/// Source preference for ID verification and channel listings
const LOOKUP_PREFERENCE: [SourceKind; 2] = [SourceKind::Api, SourceKind::Scrape];

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`DiscoveryEngine`]
///
/// Without explicit adapters the builder creates the three HTTP adapters from
/// `config.sources`.
pub struct EngineBuilder {
    config: Config,
    clock: Option<SharedClock>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    adapters: Vec<SharedSource>,
    seed: Option<u64>,
}

impl EngineBuilder {
    /// Inject a clock (tests use `ManualClock`)
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Inject a credential provider for the HTTP adapters
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Register an adapter; replaces any earlier adapter of the same kind
    pub fn with_adapter(mut self, adapter: SharedSource) -> Self {
        self.adapters.retain(|a| a.kind() != adapter.kind());
        self.adapters.push(adapter);
        self
    }

    /// Seed generators and probes; overrides `engine.seed`
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<DiscoveryEngine> {
        self.config
            .validate()
            .map_err(|e| Error::config(format!("{e:#}")))?;

        let clock: SharedClock = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let adapters = if self.adapters.is_empty() {
            let credentials: Arc<dyn CredentialProvider> = match self.credentials {
                Some(credentials) => credentials,
                None => Arc::new(EnvCredentials::from_config(&self.config.sources)),
            };
            http_adapters(&self.config, credentials, clock.clone())?
        } else {
            self.adapters
        };

        let limiter = Arc::new(RateLimiter::from_config(&self.config, clock.clone()));
        let settings = GovernorSettings::from_config(&self.config);
        let mut sources: Vec<GovernedSource> = adapters
            .into_iter()
            .map(|adapter| GovernedSource::new(adapter, limiter.clone(), settings.clone()))
            .collect();
        sources.sort_by_key(|s| s.kind());

        let seed = self.seed.or(self.config.engine.seed);
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let engine = &self.config.engine;
        let scorer = ObscurityScorer::new(self.config.scoring.clone());
        let search = SearchOrchestrator::new(sources.clone(), scorer.clone(), clock.clone())
            .with_workers(engine.max_workers)
            .with_max_results_per_source(engine.max_results_per_source)
            .with_max_queries(engine.max_generated_queries);

        info!(
            sources = ?sources.iter().map(|s| s.kind().as_str()).collect::<Vec<_>>(),
            seeded = seed.is_some(),
            "Discovery engine ready"
        );

        Ok(DiscoveryEngine {
            autopsy: ChannelAutopsy::new(self.config.autopsy.clone()),
            config: self.config,
            clock,
            limiter,
            sources,
            search,
            scorer,
            seed,
            rng: Mutex::new(rng),
        })
    }
}

fn http_adapters(
    config: &Config,
    credentials: Arc<dyn CredentialProvider>,
    clock: SharedClock,
) -> Result<Vec<SharedSource>> {
    let sources = &config.sources;
    let api: SharedSource = Arc::new(ApiSource::new(&sources.api, credentials, clock.clone())?);
    let scrape: SharedSource = Arc::new(ScrapeSource::new(&sources.scrape, clock)?);
    let archive: SharedSource = Arc::new(ArchiveSource::new(&sources.archive)?);
    Ok(vec![api, scrape, archive])
}

// ============================================================================
// Engine
// ============================================================================

/// Entry point for every discovery operation
pub struct DiscoveryEngine {
    config: Config,
    clock: SharedClock,
    limiter: Arc<RateLimiter>,
    sources: Vec<GovernedSource>,
    search: SearchOrchestrator,
    scorer: ObscurityScorer,
    autopsy: ChannelAutopsy,
    seed: Option<u64>,
    rng: Mutex<ChaCha8Rng>,
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("sources", &self.sources)
            .field("seed", &self.seed)
            .finish()
    }
}

impl DiscoveryEngine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            clock: None,
            credentials: None,
            adapters: Vec::new(),
            seed: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Registered sources, in source order
    pub fn sources(&self) -> Vec<SourceKind> {
        self.sources.iter().map(GovernedSource::kind).collect()
    }

    /// Query generator anchored at the engine clock
    ///
    /// Seeded engines hand out identically seeded generators.
    pub fn generator(&self) -> QueryGenerator {
        let now = self.clock.now();
        let generator = match self.seed {
            Some(seed) => QueryGenerator::new(seed, now),
            None => QueryGenerator::from_entropy(now),
        };
        generator.with_max_queries(self.config.engine.max_generated_queries)
    }

    /// Score a record outside a search, e.g. a probe hit
    pub fn score(&self, record: MediaRecord) -> ScoredRecord {
        let now = self.clock.now();
        ScoredRecord {
            obscurity_score: self.scorer.score(&record, now),
            flags: anomalies(&record, now),
            matched_filters: BTreeSet::new(),
            record,
        }
    }

    fn preferred(&self, order: &[SourceKind], op: OperationKind) -> Result<&GovernedSource> {
        order
            .iter()
            .filter_map(|kind| self.sources.iter().find(|s| s.kind() == *kind))
            .find(|s| s.supports(op))
            .ok_or_else(|| Error::NoSource(op.to_string()))
    }

    fn default_sources(&self, requested: &[SourceKind]) -> Vec<SourceKind> {
        if requested.is_empty() {
            let registered = self.sources();
            self.config
                .sources
                .enabled()
                .into_iter()
                .filter(|kind| registered.contains(kind))
                .collect()
        } else {
            requested.to_vec()
        }
    }

    /// Search one query; an empty `sources` means every enabled, registered source
    pub async fn search(
        &self,
        query: &Query,
        sources: &[SourceKind],
        cancel: CancelToken,
    ) -> Result<SearchOutcome> {
        let sources = self.default_sources(sources);
        self.search.run(query, &sources, &cancel).await
    }

    /// Search a batch of queries with one shared deduplicator
    pub async fn search_many(
        &self,
        queries: &[Query],
        sources: &[SourceKind],
        cancel: CancelToken,
    ) -> Result<SearchOutcome> {
        let sources = self.default_sources(sources);
        self.search.run_many(queries, &sources, &cancel).await
    }

    /// Crawl the related-content graph from `seed`
    pub async fn crawl(
        &self,
        seed: &str,
        depth: u32,
        per_hop: usize,
        cancel: CancelToken,
    ) -> Result<CrawlOutcome> {
        let seed = CandidateId::parse(seed)?;
        let source = self.preferred(&CRAWL_PREFERENCE, OperationKind::Related)?;
        debug!(source = %source.kind(), seed = %seed, depth, per_hop, "Starting crawl");

        let engine = &self.config.engine;
        CrawlEngine::new(source.clone())
            .with_workers(engine.max_workers)
            .with_limits(engine.max_crawl_depth, engine.max_per_hop)
            .crawl(&seed, depth, per_hop, &cancel)
            .await
    }

    /// Generate and verify candidate IDs
    pub async fn brute_force(&self, mode: ProbeMode, cancel: CancelToken) -> Result<ProbeOutcome> {
        let _timer = metrics::start_operation_timer("probe");
        let source = self.preferred(&LOOKUP_PREFERENCE, OperationKind::Details)?;
        let engine = &self.config.engine;
        let prober = BruteForceProber::new(source.clone())
            .with_workers(engine.max_workers)
            .with_max_batch(engine.max_probe_batch);

        let candidates = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            prober.candidates(&mode, &mut *rng)?
        };
        debug!(source = %source.kind(), mode = mode.label(), candidates = candidates.len(), "Starting probe");
        Ok(prober.verify(mode.label(), candidates, &cancel).await)
    }

    /// Fingerprint a channel from its most recent uploads
    pub async fn autopsy(&self, channel_id: &str) -> Result<ChannelFingerprint> {
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return Err(Error::invalid_query("channel id must not be empty"));
        }
        let _timer = metrics::start_operation_timer("autopsy");
        let source = self.preferred(&LOOKUP_PREFERENCE, OperationKind::ChannelUploads)?;
        let uploads = source
            .channel_uploads(channel_id, self.config.engine.max_results_per_source)
            .await?;

        let fingerprint = self
            .autopsy
            .analyze_uploads(channel_id, &uploads, self.clock.now());
        info!(
            channel = channel_id,
            uploads = uploads.len(),
            bot_likelihood = fingerprint.bot_likelihood,
            pattern = %fingerprint.pattern,
            "Autopsy finished"
        );
        Ok(fingerprint)
    }

    /// Ledger and breaker state of every source
    pub async fn quota_snapshot(&self) -> Vec<QuotaSnapshot> {
        self.limiter.snapshot().await
    }
}
