//! Multi-source search through the engine facade

use std::sync::Arc;

use obscura::engine::{CancelToken, Cancellation, DiscoveryEngine, OperationStatus};
use obscura::error::Error;
use obscura::models::{MediaRecord, Query, SortKey, SourceKind};
use obscura::quota::BreakerState;
use obscura::sources::{FailureKey, MemorySource};
use obscura::utils::error::SourceError;

use crate::common::{engine_with, fixed_now, manual_clock, record, test_config, vid};

fn views(outcome: &obscura::search::SearchOutcome) -> Vec<u64> {
    outcome
        .results
        .iter()
        .map(|r| r.record.view_count)
        .collect()
}

// ============================================================================
// Filtering and ranking
// ============================================================================

#[tokio::test]
async fn test_low_view_search_keeps_and_ranks_survivors() {
    let api = MemorySource::new(SourceKind::Api).with_search_results(vec![
        record(1, SourceKind::Api, 200),
        record(2, SourceKind::Api, 8),
        record(3, SourceKind::Api, 0),
        record(4, SourceKind::Api, 15),
        record(5, SourceKind::Api, 3),
    ]);
    let engine = engine_with(test_config(), vec![api]);

    let query = Query::new("VHS tape").with_max_views(10);
    let outcome = engine
        .search(&query, &[SourceKind::Api], CancelToken::never())
        .await
        .unwrap();

    assert_eq!(views(&outcome), vec![0, 3, 8]);
    assert!(outcome.status.is_complete());
    for scored in &outcome.results {
        assert!(scored.matched_filters.contains("max_views"));
        assert!(scored.obscurity_score <= 100);
    }
    let scores: Vec<u8> = outcome.results.iter().map(|r| r.obscurity_score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_exact_zero_overrides_max_views() {
    let api = MemorySource::new(SourceKind::Api).with_search_results(vec![
        record(1, SourceKind::Api, 0),
        record(2, SourceKind::Api, 1),
        record(3, SourceKind::Api, 499),
        record(4, SourceKind::Api, 0),
    ]);
    let engine = engine_with(test_config(), vec![api]);

    let query = Query::new("birthday")
        .with_max_views(500)
        .with_exact_zero()
        .with_sort(SortKey::Relevance);
    let outcome = engine
        .search(&query, &[SourceKind::Api], CancelToken::never())
        .await
        .unwrap();

    assert_eq!(views(&outcome), vec![0, 0]);
    assert!(outcome
        .results
        .iter()
        .all(|r| r.matched_filters.contains("exact_zero")));
}

#[tokio::test]
async fn test_filename_pattern_matches_title_or_hint() {
    let api = MemorySource::new(SourceKind::Api).with_search_results(vec![
        record(1, SourceKind::Api, 0).with_title("IMG_4411"),
        record(2, SourceKind::Api, 0)
            .with_title("summer")
            .with_filename_hint("MVI_0032.MOV"),
        record(3, SourceKind::Api, 0).with_title("my IMG_ collection"),
    ]);
    let engine = engine_with(test_config(), vec![api]);

    let query = Query::new("")
        .with_patterns(["img_", "MVI_"])
        .with_sort(SortKey::Relevance);
    let outcome = engine
        .search(&query, &[SourceKind::Api], CancelToken::never())
        .await
        .unwrap();

    let ids: Vec<String> = outcome
        .results
        .iter()
        .map(|r| r.record.id.to_string())
        .collect();
    assert_eq!(ids, vec![vid(1).to_string(), vid(2).to_string()]);
    assert!(outcome.results[0].matched_filters.contains("pattern:img_"));
    assert!(outcome.results[1].matched_filters.contains("pattern:MVI_"));
}

#[tokio::test]
async fn test_min_age_excludes_recent_and_undated() {
    let now = fixed_now();
    let api = MemorySource::new(SourceKind::Api).with_search_results(vec![
        record(1, SourceKind::Api, 0).with_uploaded_at(now - chrono::Duration::days(400)),
        record(2, SourceKind::Api, 0).with_uploaded_at(now - chrono::Duration::days(10)),
        record(3, SourceKind::Api, 0),
    ]);
    let engine = engine_with(test_config(), vec![api]);

    let query = Query::new("tape").with_min_age_days(365);
    let outcome = engine
        .search(&query, &[SourceKind::Api], CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].record.id.to_string(), vid(1).to_string());
}

// ============================================================================
// Merging across sources
// ============================================================================

#[tokio::test]
async fn test_cross_source_dedup_keeps_first_enabled_source() {
    let api = MemorySource::new(SourceKind::Api)
        .with_search_results(vec![record(1, SourceKind::Api, 4)]);
    let scrape = MemorySource::new(SourceKind::Scrape).with_search_results(vec![
        record(1, SourceKind::Scrape, 4),
        record(2, SourceKind::Scrape, 9),
    ]);
    // Same characters as a video ID, different identifier space
    let archive = MemorySource::new(SourceKind::Archive)
        .with_search_results(vec![MediaRecord::archive(vid(1).as_str()).with_views(2)]);
    let engine = engine_with(test_config(), vec![api, scrape, archive]);

    let query = Query::new("home movie").with_sort(SortKey::Relevance);
    let outcome = engine
        .search(&query, &[], CancelToken::never())
        .await
        .unwrap();

    let found: Vec<(String, SourceKind)> = outcome
        .results
        .iter()
        .map(|r| (r.record.id.to_string(), r.record.source))
        .collect();
    assert_eq!(
        found,
        vec![
            (vid(1).to_string(), SourceKind::Api),
            (vid(2).to_string(), SourceKind::Scrape),
            (format!("archive:{}", vid(1)), SourceKind::Archive),
        ]
    );

    let scrape_report = outcome
        .reports
        .iter()
        .find(|r| r.source == SourceKind::Scrape)
        .unwrap();
    assert_eq!(scrape_report.fetched, 2);
    assert_eq!(scrape_report.kept, 1);
}

#[tokio::test]
async fn test_failing_source_degrades_to_partial_failure() {
    let api = MemorySource::new(SourceKind::Api)
        .with_search_results(vec![record(1, SourceKind::Api, 0)]);
    let scrape = MemorySource::new(SourceKind::Scrape).fail_always(
        FailureKey::Search,
        SourceError::unavailable(SourceKind::Scrape, "connection reset"),
    );
    let engine = engine_with(test_config(), vec![api, scrape]);

    let outcome = engine
        .search(
            &Query::new("camcorder"),
            &[SourceKind::Api, SourceKind::Scrape],
            CancelToken::never(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    match &outcome.status {
        OperationStatus::PartialFailure { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].source_kind(), SourceKind::Scrape);
        }
        other => panic!("expected partial failure, got {other:?}"),
    }
    let scrape_report = outcome
        .reports
        .iter()
        .find(|r| r.source == SourceKind::Scrape)
        .unwrap();
    assert!(!scrape_report.is_healthy());
}

#[tokio::test]
async fn test_every_source_failing_is_an_error() {
    let api = MemorySource::new(SourceKind::Api).fail_always(
        FailureKey::Search,
        SourceError::unavailable(SourceKind::Api, "dns"),
    );
    let engine = engine_with(test_config(), vec![api]);

    let err = engine
        .search(&Query::new("x"), &[SourceKind::Api], CancelToken::never())
        .await
        .unwrap_err();
    match err {
        Error::AllSourcesFailed(failures) => assert_eq!(failures.len(), 1),
        other => panic!("expected AllSourcesFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unregistered_source_is_rejected() {
    let engine = engine_with(test_config(), vec![MemorySource::new(SourceKind::Api)]);
    let err = engine
        .search(&Query::new("x"), &[SourceKind::Archive], CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSource(_)));
}

#[tokio::test]
async fn test_empty_source_list_uses_registered_sources() {
    // Config enables all three kinds; only the official API is registered
    let api = MemorySource::new(SourceKind::Api)
        .with_search_results(vec![record(1, SourceKind::Api, 0)]);
    let engine = engine_with(test_config(), vec![api]);

    let outcome = engine
        .search(&Query::new("x"), &[], CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.status.is_complete());
}

#[tokio::test]
async fn test_empty_date_window_is_invalid() {
    let engine = engine_with(test_config(), vec![MemorySource::new(SourceKind::Api)]);
    let query = Query::new("x").with_date_range(Some(fixed_now()), Some(fixed_now()));

    let err = engine
        .search(&query, &[SourceKind::Api], CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
}

// ============================================================================
// Batches and quota
// ============================================================================

#[tokio::test]
async fn test_batch_drops_exhausted_source() {
    let mut config = test_config();
    // One 101-unit search fits, the second does not
    config.quota.api.window_units = 150;

    let api = Arc::new(
        MemorySource::new(SourceKind::Api)
            .with_search_results(vec![record(1, SourceKind::Api, 0)]),
    );
    let scrape = Arc::new(MemorySource::new(SourceKind::Scrape).with_search_results(vec![
        record(1, SourceKind::Scrape, 0),
        record(2, SourceKind::Scrape, 1),
    ]));
    let engine = DiscoveryEngine::builder(config)
        .with_clock(Arc::new(manual_clock()))
        .with_adapter(api.clone())
        .with_adapter(scrape.clone())
        .build()
        .unwrap();

    let queries = vec![Query::new("a"), Query::new("b"), Query::new("c")];
    let outcome = engine
        .search_many(
            &queries,
            &[SourceKind::Api, SourceKind::Scrape],
            CancelToken::never(),
        )
        .await
        .unwrap();

    // Shared dedup: each ID once across the whole batch
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(api.call_count(), 1);
    assert_eq!(scrape.call_count(), 3);
    assert!(matches!(
        outcome.status,
        OperationStatus::PartialFailure { .. }
    ));

    let snapshot = engine.quota_snapshot().await;
    let api_quota = snapshot
        .iter()
        .find(|s| s.source == SourceKind::Api)
        .unwrap();
    assert_eq!(api_quota.units_remaining, 49);
}

#[tokio::test]
async fn test_batch_stops_when_every_source_exhausted() {
    let mut config = test_config();
    config.quota.api.window_units = 150;
    let api = MemorySource::new(SourceKind::Api)
        .with_search_results(vec![record(1, SourceKind::Api, 0)]);
    let engine = engine_with(config, vec![api]);

    let queries = vec![Query::new("a"), Query::new("b"), Query::new("c")];
    let outcome = engine
        .search_many(&queries, &[SourceKind::Api], CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.status, OperationStatus::QuotaExhausted);
}

#[tokio::test]
async fn test_cancelled_search_returns_promptly() {
    let api = MemorySource::new(SourceKind::Api)
        .with_search_results(vec![record(1, SourceKind::Api, 0)])
        .with_latency(std::time::Duration::from_millis(500));
    let engine = engine_with(test_config(), vec![api]);

    let cancellation = Cancellation::new();
    cancellation.cancel();
    let outcome = engine
        .search(&Query::new("x"), &[SourceKind::Api], cancellation.token())
        .await
        .unwrap();

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.status, OperationStatus::Cancelled);
}

#[tokio::test]
async fn test_cancelled_recovery_call_releases_breaker() {
    let mut config = test_config();
    config.breaker.failure_threshold = 1;
    let clock = manual_clock();
    let api = MemorySource::new(SourceKind::Api)
        .with_search_results(vec![record(1, SourceKind::Api, 0)])
        .with_latency(std::time::Duration::from_millis(300))
        .fail_times(
            FailureKey::Search,
            1,
            SourceError::throttled(SourceKind::Api, "429"),
        );
    let engine = DiscoveryEngine::builder(config)
        .with_clock(Arc::new(clock.clone()))
        .with_seed(42)
        .with_adapter(Arc::new(api))
        .build()
        .unwrap();
    let query = Query::new("x");

    assert!(engine
        .search(&query, &[SourceKind::Api], CancelToken::never())
        .await
        .is_err());
    clock.advance(chrono::Duration::seconds(31));

    // The first call after the cool-down is abandoned mid-flight
    let cancellation = Cancellation::new();
    let trigger = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let outcome = engine
        .search(&query, &[SourceKind::Api], cancellation.token())
        .await
        .unwrap();
    assert_eq!(outcome.status, OperationStatus::Cancelled);

    let outcome = engine
        .search(&query, &[SourceKind::Api], CancelToken::never())
        .await
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.status.is_complete());

    let snapshot = engine.quota_snapshot().await;
    let api_quota = snapshot
        .iter()
        .find(|s| s.source == SourceKind::Api)
        .unwrap();
    assert_eq!(api_quota.breaker, BreakerState::Closed);
}
