//! Breadth-first crawl of the related-content graph
//!
//! The crawl starts from one seed at depth 0 and expands one hop at a time. Every node
//! at `depth < max_depth` asks the source for at most `per_hop` related candidates;
//! candidates not yet seen in this crawl become nodes at `depth + 1`. The graph may
//! contain cycles, so the visited set is the only thing that keeps the walk finite.
//!
//! Bounds:
//! - branch width: `per_hop` per expanded node
//! - total discovered nodes (seed excluded): `per_hop^max_depth`, saturating
//! - a failed expansion abandons that branch only

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{CandidateId, CrawlNode};
use crate::operation::{CancelToken, OperationStatus};
use crate::sources::GovernedSource;
use crate::utils::error::SourceError;

/// Directed "related-to" edge that discovered a new node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlEdge {
    pub from: CandidateId,
    pub to: CandidateId,
}

/// Expansion that failed; the node stays in the result with no children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchFailure {
    pub node: CandidateId,
    pub depth: u32,
    pub error: SourceError,
}

/// Result of one crawl
#[derive(Debug, Clone, Serialize)]
pub struct CrawlOutcome {
    pub operation_id: Uuid,
    /// Visited nodes in discovery order, seed first
    pub nodes: Vec<CrawlNode>,
    pub edges: Vec<CrawlEdge>,
    pub failures: Vec<BranchFailure>,
    /// Whether the `per_hop^max_depth` ceiling cut the crawl short
    pub capped: bool,
    pub status: OperationStatus,
}

impl CrawlOutcome {
    /// Nodes discovered through the graph, seed excluded
    pub fn discovered(&self) -> &[CrawlNode] {
        self.nodes.get(1..).unwrap_or_default()
    }
}

/// Ceiling on discovered nodes for a crawl shape
pub fn node_ceiling(per_hop: usize, max_depth: u32) -> usize {
    per_hop.saturating_pow(max_depth)
}

/// Related-content crawler bound to one source
#[derive(Debug, Clone)]
pub struct CrawlEngine {
    source: GovernedSource,
    workers: usize,
    depth_limit: u32,
    per_hop_limit: usize,
}

impl CrawlEngine {
    pub fn new(source: GovernedSource) -> Self {
        Self {
            source,
            workers: 1,
            depth_limit: 5,
            per_hop_limit: 20,
        }
    }

    /// Concurrent expansions within one hop
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Largest depth and branch width a caller may request
    pub fn with_limits(mut self, depth_limit: u32, per_hop_limit: usize) -> Self {
        self.depth_limit = depth_limit;
        self.per_hop_limit = per_hop_limit;
        self
    }

    fn validate(&self, max_depth: u32, per_hop: usize) -> Result<()> {
        if max_depth == 0 || max_depth > self.depth_limit {
            return Err(Error::invalid_query(format!(
                "crawl depth {max_depth}, allowed 1..={}",
                self.depth_limit
            )));
        }
        if per_hop == 0 || per_hop > self.per_hop_limit {
            return Err(Error::invalid_query(format!(
                "per-hop limit {per_hop}, allowed 1..={}",
                self.per_hop_limit
            )));
        }
        Ok(())
    }

    /// Crawl outward from `seed`
    pub async fn crawl(
        &self,
        seed: &CandidateId,
        max_depth: u32,
        per_hop: usize,
        cancel: &CancelToken,
    ) -> Result<CrawlOutcome> {
        self.validate(max_depth, per_hop)?;
        let _timer = metrics::start_operation_timer("crawl");

        let operation_id = Uuid::new_v4();
        let ceiling = node_ceiling(per_hop, max_depth);
        let mut visited = Deduplicator::new();
        visited.insert_candidate(seed);

        let mut nodes = vec![CrawlNode {
            id: seed.clone(),
            depth: 0,
            parent: None,
        }];
        let mut edges = Vec::new();
        let mut failures = Vec::new();
        let mut frontier = vec![seed.clone()];
        let mut depth = 0u32;
        let mut capped = false;
        let mut cancelled = false;
        let mut quota_stopped = false;

        'hops: while depth < max_depth && !frontier.is_empty() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            debug!(depth, frontier = frontier.len(), "Expanding hop");

            let source = &self.source;
            let mut expansions = stream::iter(std::mem::take(&mut frontier))
                .map(|id| async move {
                    let related = source.related(&id, per_hop).await;
                    (id, related)
                })
                .buffered(self.workers);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break 'hops;
                    }
                    next = expansions.next() => next,
                };
                let Some((parent, related)) = next else {
                    break;
                };

                let children = match related {
                    Ok(children) => children,
                    Err(e @ SourceError::QuotaExhausted { .. }) => {
                        warn!(node = %parent, error = %e, "Quota exhausted, stopping crawl");
                        quota_stopped = true;
                        break 'hops;
                    }
                    Err(e) => {
                        warn!(node = %parent, depth, error = %e, "Branch abandoned");
                        failures.push(BranchFailure {
                            node: parent,
                            depth,
                            error: e,
                        });
                        continue;
                    }
                };

                for child in children.into_iter().take(per_hop) {
                    if !visited.insert_candidate(&child) {
                        continue;
                    }
                    if nodes.len() > ceiling {
                        capped = true;
                        break 'hops;
                    }
                    edges.push(CrawlEdge {
                        from: parent.clone(),
                        to: child.clone(),
                    });
                    nodes.push(CrawlNode {
                        id: child.clone(),
                        depth: depth + 1,
                        parent: Some(parent.clone()),
                    });
                    frontier.push(child);
                }
            }
            depth += 1;
        }

        let status = OperationStatus::resolve(
            cancelled,
            quota_stopped,
            failures.iter().map(|f| f.error.clone()).collect(),
        );
        info!(
            operation = %operation_id,
            seed = %seed,
            nodes = nodes.len(),
            edges = edges.len(),
            failures = failures.len(),
            capped,
            status = status.label(),
            "Crawl finished"
        );

        Ok(CrawlOutcome {
            operation_id,
            nodes,
            edges,
            failures,
            capped,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BreakerConfig, SourceQuotaConfig};
    use crate::models::SourceKind;
    use crate::operation::Cancellation;
    use crate::quota::{CostTable, RateLimiter};
    use crate::sources::{FailureKey, GovernorSettings, MemorySource, SourceAdapter};
    use crate::utils::retry::RetryConfig;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn id(s: &str) -> CandidateId {
        CandidateId::parse(s).unwrap()
    }

    fn engine(source: MemorySource, units: u64) -> CrawlEngine {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let limiter = RateLimiter::new(Arc::new(clock)).with_source(
            source.kind(),
            &SourceQuotaConfig {
                window_secs: 86_400,
                window_units: units,
                requests_per_second: 1_000,
                burst: 1_000,
                costs: CostTable::flat(1),
            },
            &BreakerConfig::default(),
        );
        let settings = GovernorSettings {
            call_timeout: Duration::from_millis(200),
            max_permit_wait: Duration::from_millis(50),
            retry: RetryConfig::with_delays(0, 1, 1),
        };
        CrawlEngine::new(GovernedSource::new(
            Arc::new(source),
            Arc::new(limiter),
            settings,
        ))
        .with_workers(2)
    }

    #[tokio::test]
    async fn test_cycles_never_revisit() {
        let (a, b, c) = (id("aaaaaaaaaaa"), id("bbbbbbbbbbb"), id("ccccccccccc"));
        let source = MemorySource::new(SourceKind::Scrape)
            .with_related(&a, vec![b.clone(), c.clone()])
            .with_related(&b, vec![a.clone(), c.clone()])
            .with_related(&c, vec![a.clone(), b.clone()]);

        let outcome = engine(source, 1_000)
            .crawl(&a, 4, 5, &CancelToken::never())
            .await
            .unwrap();

        let unique: HashSet<_> = outcome.nodes.iter().map(|n| n.id.clone()).collect();
        assert_eq!(outcome.nodes.len(), 3);
        assert_eq!(unique.len(), 3);
        assert_eq!(outcome.edges.len(), 2);
        assert_eq!(outcome.nodes[0].depth, 0);
        assert!(outcome.discovered().iter().all(|n| n.depth == 1));
        assert!(outcome.status.is_complete());
    }

    #[tokio::test]
    async fn test_depth_is_terminal_at_max() {
        let (a, b, c, d) = (
            id("aaaaaaaaaaa"),
            id("bbbbbbbbbbb"),
            id("ccccccccccc"),
            id("ddddddddddd"),
        );
        let source = MemorySource::new(SourceKind::Scrape)
            .with_related(&a, vec![b.clone()])
            .with_related(&b, vec![c.clone()])
            .with_related(&c, vec![d.clone()]);

        let outcome = engine(source, 1_000)
            .crawl(&a, 2, 3, &CancelToken::never())
            .await
            .unwrap();

        let depths: Vec<u32> = outcome.nodes.iter().map(|n| n.depth).collect();
        assert_eq!(depths, vec![0, 1, 2]);
        assert_eq!(outcome.nodes[2].parent, Some(b));
    }

    #[tokio::test]
    async fn test_failed_branch_is_not_fatal() {
        let (a, b, c, d) = (
            id("aaaaaaaaaaa"),
            id("bbbbbbbbbbb"),
            id("ccccccccccc"),
            id("ddddddddddd"),
        );
        let source = MemorySource::new(SourceKind::Scrape)
            .with_related(&a, vec![b.clone(), c.clone()])
            .with_related(&c, vec![d.clone()])
            .fail_always(
                FailureKey::Related(b.as_str().to_string()),
                SourceError::unavailable(SourceKind::Scrape, "reset"),
            );

        let outcome = engine(source, 1_000)
            .crawl(&a, 3, 5, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(outcome.nodes.len(), 4);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].node, b);
        assert_eq!(outcome.status.label(), "partial_failure");
    }

    #[tokio::test]
    async fn test_node_ceiling_caps_discovery() {
        let seed = id("AAAAAAAAAAA");
        let children = crate::probe::neighbors(&seed, 3);
        let source = MemorySource::new(SourceKind::Scrape).with_related(&seed, children);

        let outcome = engine(source, 1_000)
            .crawl(&seed, 1, 4, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(outcome.discovered().len(), 4);
        assert!(!outcome.capped);
        assert_eq!(node_ceiling(20, 5), 3_200_000);
        assert_eq!(node_ceiling(usize::MAX, 2), usize::MAX);
    }

    #[tokio::test]
    async fn test_ceiling_cuts_full_binary_tree() {
        let nodes: Vec<CandidateId> = [
            "AAAAAAAAAAB",
            "AAAAAAAAAAC",
            "AAAAAAAAAAD",
            "AAAAAAAAAAE",
            "AAAAAAAAAAF",
            "AAAAAAAAAAG",
            "AAAAAAAAAAH",
        ]
        .into_iter()
        .map(id)
        .collect();
        // Six nodes reachable within two hops, but 2^2 allowed
        let source = MemorySource::new(SourceKind::Scrape)
            .with_related(&nodes[0], vec![nodes[1].clone(), nodes[2].clone()])
            .with_related(&nodes[1], vec![nodes[3].clone(), nodes[4].clone()])
            .with_related(&nodes[2], vec![nodes[5].clone(), nodes[6].clone()]);

        let outcome = engine(source, 1_000)
            .crawl(&nodes[0], 2, 2, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(node_ceiling(2, 2), 4);
        assert_eq!(outcome.discovered().len(), 4);
        assert!(outcome.capped);
        assert_eq!(outcome.edges.len(), 4);
        assert!(outcome.status.is_complete());
    }

    #[tokio::test]
    async fn test_cancel_mid_hop_keeps_discovered_nodes() {
        let (a, b, c, d) = (
            id("aaaaaaaaaaa"),
            id("bbbbbbbbbbb"),
            id("ccccccccccc"),
            id("ddddddddddd"),
        );
        let source = MemorySource::new(SourceKind::Scrape)
            .with_latency(Duration::from_millis(100))
            .with_related(&a, vec![b.clone()])
            .with_related(&b, vec![c.clone()])
            .with_related(&c, vec![d.clone()]);

        let cancellation = Cancellation::new();
        let trigger = cancellation.clone();
        tokio::spawn(async move {
            // Lands while the third expansion is in flight
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let outcome = engine(source, 1_000)
            .crawl(&a, 4, 1, &cancellation.token())
            .await
            .unwrap();

        assert_eq!(outcome.status, OperationStatus::Cancelled);
        let ids: Vec<CandidateId> = outcome.nodes.iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!(!outcome.capped);
    }

    #[tokio::test]
    async fn test_quota_stops_crawl() {
        let (a, b, c) = (id("aaaaaaaaaaa"), id("bbbbbbbbbbb"), id("ccccccccccc"));
        let source = MemorySource::new(SourceKind::Scrape)
            .with_related(&a, vec![b.clone()])
            .with_related(&b, vec![c.clone()]);

        let outcome = engine(source, 1)
            .crawl(&a, 3, 5, &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(outcome.nodes.len(), 2);
        assert_eq!(outcome.status, OperationStatus::QuotaExhausted);
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_shape() {
        let crawler = engine(MemorySource::new(SourceKind::Scrape), 10).with_limits(3, 10);
        let seed = id("aaaaaaaaaaa");
        let never = CancelToken::never();

        assert!(crawler.crawl(&seed, 0, 5, &never).await.is_err());
        assert!(crawler.crawl(&seed, 4, 5, &never).await.is_err());
        assert!(crawler.crawl(&seed, 2, 11, &never).await.is_err());
    }
}
