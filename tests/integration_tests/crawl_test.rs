//! Related-content crawls through the engine facade

use std::collections::HashSet;

use obscura::engine::{CancelToken, OperationStatus};
use obscura::error::Error;
use obscura::models::SourceKind;
use obscura::sources::{FailureKey, MemorySource};
use obscura::utils::error::SourceError;

use crate::common::{engine_with, test_config, vid};

/// A -> B, C; B -> A, D; C -> A, B; D -> A
fn cyclic_graph() -> MemorySource {
    MemorySource::new(SourceKind::Scrape)
        .with_related(&vid(1), vec![vid(2), vid(3)])
        .with_related(&vid(2), vec![vid(1), vid(4)])
        .with_related(&vid(3), vec![vid(1), vid(2)])
        .with_related(&vid(4), vec![vid(1)])
}

#[tokio::test]
async fn test_crawl_terminates_on_cycles_back_to_seed() {
    let engine = engine_with(test_config(), vec![cyclic_graph()]);

    let outcome = engine
        .crawl(vid(1).as_str(), 3, 5, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.nodes[0].id, vid(1));
    assert_eq!(outcome.nodes[0].depth, 0);

    let discovered: Vec<_> = outcome.discovered().iter().map(|n| n.id.clone()).collect();
    assert_eq!(discovered, vec![vid(2), vid(3), vid(4)]);

    let unique: HashSet<_> = outcome.nodes.iter().map(|n| n.id.clone()).collect();
    assert_eq!(unique.len(), outcome.nodes.len());

    let d = outcome.nodes.iter().find(|n| n.id == vid(4)).unwrap();
    assert_eq!(d.depth, 2);
    assert_eq!(d.parent, Some(vid(2)));

    // Only edges that discovered a node
    assert_eq!(outcome.edges.len(), 3);
    assert!(outcome.status.is_complete());
    assert!(!outcome.capped);
}

#[tokio::test]
async fn test_crawl_depth_one_stops_after_first_hop() {
    let engine = engine_with(test_config(), vec![cyclic_graph()]);

    let outcome = engine
        .crawl(vid(1).as_str(), 1, 5, CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.discovered().len(), 2);
    assert!(outcome.discovered().iter().all(|n| n.depth == 1));
}

#[tokio::test]
async fn test_failed_branch_keeps_rest_of_crawl() {
    let graph = cyclic_graph().fail_always(
        FailureKey::Related(vid(2).as_str().to_string()),
        SourceError::decode(SourceKind::Scrape, "page layout changed"),
    );
    let engine = engine_with(test_config(), vec![graph]);

    let outcome = engine
        .crawl(vid(1).as_str(), 3, 5, CancelToken::never())
        .await
        .unwrap();

    // D was only reachable through B
    let ids: Vec<_> = outcome.discovered().iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids, vec![vid(2), vid(3)]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].node, vid(2));
    assert!(matches!(
        outcome.status,
        OperationStatus::PartialFailure { .. }
    ));
}

#[tokio::test]
async fn test_crawl_respects_configured_limits() {
    let engine = engine_with(test_config(), vec![cyclic_graph()]);
    let max_depth = engine.config().engine.max_crawl_depth;

    let too_deep = engine
        .crawl(vid(1).as_str(), max_depth + 1, 5, CancelToken::never())
        .await;
    assert!(matches!(too_deep, Err(Error::InvalidQuery(_))));

    let zero_width = engine
        .crawl(vid(1).as_str(), 2, 0, CancelToken::never())
        .await;
    assert!(matches!(zero_width, Err(Error::InvalidQuery(_))));
}

#[tokio::test]
async fn test_crawl_stops_on_quota_exhaustion() {
    let mut config = test_config();
    config.quota.scrape.window_units = 1;
    let engine = engine_with(config, vec![cyclic_graph()]);

    let outcome = engine
        .crawl(vid(1).as_str(), 3, 5, CancelToken::never())
        .await
        .unwrap();

    // Seed expansion spent the only unit
    assert_eq!(outcome.discovered().len(), 2);
    assert_eq!(outcome.status, OperationStatus::QuotaExhausted);
}
