//! Common test utilities

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use obscura::clock::ManualClock;
use obscura::config::Config;
use obscura::engine::DiscoveryEngine;
use obscura::models::{CandidateId, MediaRecord, SourceKind};
use obscura::sources::MemorySource;
use obscura::utils::retry::RetryConfig;

/// Instant every test clock starts at
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> ManualClock {
    ManualClock::new(fixed_now())
}

/// Deterministic 11-character video ID for a small number
pub fn vid(n: usize) -> CandidateId {
    CandidateId::parse(&format!("vid{n:08}")).unwrap()
}

/// Video record with a title and view count
pub fn record(n: usize, source: SourceKind, views: u64) -> MediaRecord {
    MediaRecord::video(vid(n), source)
        .with_title(format!("upload {n}"))
        .with_views(views)
}

/// Defaults with generous rates and instant retries
pub fn test_config() -> Config {
    let mut config = Config::default();
    for quota in [
        &mut config.quota.api,
        &mut config.quota.scrape,
        &mut config.quota.archive,
    ] {
        quota.requests_per_second = 1_000;
        quota.burst = 1_000;
    }
    config.retry = RetryConfig::with_delays(1, 1, 2);
    config.engine.call_timeout_secs = 2;
    config.engine.max_permit_wait_secs = 1;
    config
}

/// Engine over in-memory sources, seeded and pinned to [`fixed_now`]
pub fn engine_with(config: Config, sources: Vec<MemorySource>) -> DiscoveryEngine {
    sources
        .into_iter()
        .fold(
            DiscoveryEngine::builder(config)
                .with_clock(Arc::new(manual_clock()))
                .with_seed(42),
            |builder, source| builder.with_adapter(Arc::new(source)),
        )
        .build()
        .unwrap()
}
