//! Brute-force probing through the engine facade

use std::collections::HashSet;

use obscura::engine::{CancelToken, OperationStatus};
use obscura::error::Error;
use obscura::models::{MediaRecord, SourceKind};
use obscura::probe::{neighbors, ProbeMode};
use obscura::sources::MemorySource;

use crate::common::{engine_with, test_config, vid};

#[tokio::test]
async fn test_neighbor_probe_finds_adjacent_uploads() {
    let seed = vid(500);
    let adjacent = neighbors(&seed, 3);
    let api = MemorySource::new(SourceKind::Api)
        .with_record(MediaRecord::video(adjacent[0].clone(), SourceKind::Api).with_views(0))
        .with_record(MediaRecord::video(adjacent[3].clone(), SourceKind::Api).with_views(2));
    let engine = engine_with(test_config(), vec![api]);

    let outcome = engine
        .brute_force(ProbeMode::Neighbors { seed, k: 3 }, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.mode, "neighbors");
    assert_eq!(outcome.candidates, 6);
    assert_eq!(outcome.hits.len(), 2);
    assert_eq!(outcome.misses, 4);
    assert_eq!(outcome.unverified, 0);
    assert!(outcome.status.is_complete());

    let hit_ids: HashSet<String> = outcome.hits.iter().map(|r| r.id.to_string()).collect();
    assert!(hit_ids.contains(adjacent[0].as_str()));
    assert!(hit_ids.contains(adjacent[3].as_str()));
}

#[tokio::test]
async fn test_random_probe_counts_every_candidate() {
    let engine = engine_with(test_config(), vec![MemorySource::new(SourceKind::Api)]);

    let outcome = engine
        .brute_force(ProbeMode::Random { count: 8 }, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.mode, "random");
    assert_eq!(outcome.candidates, 8);
    assert!(outcome.hits.is_empty());
    assert_eq!(outcome.misses + outcome.unverified, 8);
}

#[test]
fn test_seeded_engines_generate_identical_queries() {
    let first = engine_with(test_config(), vec![MemorySource::new(SourceKind::Api)]);
    let second = engine_with(test_config(), vec![MemorySource::new(SourceKind::Api)]);

    let a = first.generator().chaos(4).unwrap();
    let b = second.generator().chaos(4).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_probe_batch_over_ceiling_is_rejected() {
    let mut config = test_config();
    config.engine.max_probe_batch = 10;
    let engine = engine_with(config, vec![MemorySource::new(SourceKind::Api)]);

    let err = engine
        .brute_force(ProbeMode::Random { count: 11 }, CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));

    let err = engine
        .brute_force(
            ProbeMode::Neighbors { seed: vid(1), k: 6 },
            CancelToken::never(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
}

#[tokio::test]
async fn test_probe_stops_when_quota_runs_out() {
    let mut config = test_config();
    config.quota.api.window_units = 4;
    let engine = engine_with(config, vec![MemorySource::new(SourceKind::Api)]);

    let outcome = engine
        .brute_force(ProbeMode::Random { count: 10 }, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.misses, 4);
    assert_eq!(outcome.unverified, 6);
    assert_eq!(outcome.status, OperationStatus::QuotaExhausted);
}
