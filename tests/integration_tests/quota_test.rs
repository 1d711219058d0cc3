//! Shared quota ledger, token bucket and breaker under concurrent use

use chrono::Duration;
use std::sync::Arc;

use obscura::clock::{Clock, ManualClock};
use obscura::config::{BreakerConfig, SourceQuotaConfig};
use obscura::models::SourceKind;
use obscura::quota::{BreakerState, CostTable, DenyReason, Permit, RateLimiter};

use crate::common::manual_clock;

fn quota(units: u64) -> SourceQuotaConfig {
    SourceQuotaConfig {
        window_secs: 86_400,
        window_units: units,
        requests_per_second: 1_000,
        burst: 1_000,
        costs: CostTable::flat(1),
    }
}

fn limiter(clock: &ManualClock, units: u64) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(Arc::new(clock.clone())).with_source(
        SourceKind::Scrape,
        &quota(units),
        &BreakerConfig::default(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let clock = manual_clock();
    let limiter = limiter(&clock, 50);

    let handles: Vec<_> = (0..200)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire(SourceKind::Scrape, 1).await })
        })
        .collect();

    let mut granted = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Permit::Granted { .. } => granted += 1,
            Permit::Denied(DenyReason::QuotaExhausted { .. }) => exhausted += 1,
            other => panic!("unexpected permit {other:?}"),
        }
    }

    assert_eq!(granted, 50);
    assert_eq!(exhausted, 150);
    let snapshot = limiter.snapshot_of(SourceKind::Scrape).await.unwrap();
    assert_eq!(snapshot.units_remaining, 0);
}

#[tokio::test]
async fn test_budget_resets_with_the_window() {
    let clock = manual_clock();
    let limiter = limiter(&clock, 3);

    for _ in 0..3 {
        assert!(matches!(
            limiter.acquire(SourceKind::Scrape, 1).await,
            Permit::Granted { .. }
        ));
    }
    let denied = limiter.acquire(SourceKind::Scrape, 1).await;
    let Permit::Denied(DenyReason::QuotaExhausted { resets_at }) = denied else {
        panic!("expected exhaustion, got {denied:?}");
    };
    assert!(resets_at > clock.now());

    clock.advance(Duration::days(1));
    assert!(matches!(
        limiter.acquire(SourceKind::Scrape, 1).await,
        Permit::Granted { remaining: 2, .. }
    ));
}

#[tokio::test]
async fn test_oversized_call_is_denied_without_debit() {
    let clock = manual_clock();
    let limiter = limiter(&clock, 10);

    assert!(matches!(
        limiter.acquire(SourceKind::Scrape, 11).await,
        Permit::Denied(DenyReason::QuotaExhausted { .. })
    ));
    let snapshot = limiter.snapshot_of(SourceKind::Scrape).await.unwrap();
    assert_eq!(snapshot.units_remaining, 10);
}

#[tokio::test]
async fn test_breaker_opens_and_recovers_after_cool_down() {
    let clock = manual_clock();
    let limiter = limiter(&clock, 1_000);
    let threshold = BreakerConfig::default().failure_threshold;

    for _ in 0..threshold {
        assert!(matches!(
            limiter.acquire(SourceKind::Scrape, 1).await,
            Permit::Granted { .. }
        ));
        limiter.record_throttled(SourceKind::Scrape).await;
    }

    let snapshot = limiter.snapshot_of(SourceKind::Scrape).await.unwrap();
    assert!(matches!(snapshot.breaker, BreakerState::Open { .. }));
    assert!(matches!(
        limiter.acquire(SourceKind::Scrape, 1).await,
        Permit::Denied(DenyReason::BreakerOpen { .. })
    ));

    // Past the longest possible cool-down a single probe is admitted
    clock.advance(Duration::seconds(
        BreakerConfig::default().max_backoff_secs as i64 + 1,
    ));
    assert!(matches!(
        limiter.acquire(SourceKind::Scrape, 1).await,
        Permit::Granted { .. }
    ));
    limiter.record_success(SourceKind::Scrape).await;
    let snapshot = limiter.snapshot_of(SourceKind::Scrape).await.unwrap();
    assert_eq!(snapshot.breaker, BreakerState::Closed);
}

#[tokio::test]
async fn test_unregistered_source_is_denied() {
    let clock = manual_clock();
    let limiter = limiter(&clock, 10);
    assert!(matches!(
        limiter.acquire(SourceKind::Api, 1).await,
        Permit::Denied(DenyReason::Unregistered)
    ));
}
